//! The consumed runtime surface (§6): trait boundaries a host must
//! implement for compiled artifacts to run. Generalizes `vm.rs`'s concrete
//! `Executor`/`Memory` pair into a trait so the real host — which owns
//! rendering, audio, and the scheduler, all out of scope here — can live
//! entirely outside this crate.

use crate::value::Value;

/// The yield tag handed to the scheduler's suspension primitive. The
/// emitter never invents a fourth tag (§4.E).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum YieldTag {
    Yield,
    YieldTick,
    Wait,
}

/// Runtime option flags threaded through the driver and emitter (§6, §10.3
/// of the expanded spec). Plain struct, `Default`-constructed by the host.
#[derive(Debug, Clone, Copy)]
pub struct RuntimeOptions {
    pub fencing: bool,
    pub max_clones: u32,
    pub misc_limits: bool,
}

impl Default for RuntimeOptions {
    fn default() -> Self {
        RuntimeOptions { fencing: true, max_clones: 300, misc_limits: true }
    }
}

/// The project-wide runtime surface a compiled script is invoked against.
pub trait Runtime {
    fn is_stuck(&self) -> bool;
    fn mouse_x(&self) -> f64;
    fn mouse_y(&self) -> f64;
    /// Seconds since the project's timer was last reset (`sensing_timer`).
    fn timer(&self) -> f64;
    fn scratch_to_screen_x(&self, x: f64) -> f64;
    fn scratch_to_screen_y(&self, y: f64) -> f64;
    fn get_sprite_target_by_name(&self, name: &str) -> Option<String>;
    fn broadcast(&mut self, name: &str);
    fn add_target(&mut self, target_id: &str) -> String;
    fn delete_clone(&mut self, target_id: &str);
    fn start_hat_blocks(&mut self, hat_opcode: &str, field_values: &[String]);
    fn clones_available(&self) -> bool;
    fn register_active_key(&mut self, key: &str);
    fn is_key_pressed(&self, key: &str) -> bool;
    fn request_redraw(&mut self);
    fn stop_all(&mut self);
    fn stop_for_target(&mut self, target_id: &str);
    fn options(&self) -> RuntimeOptions;
}

/// Per-sprite-or-stage state and the motion/looks/pen operations §6
/// requires the host to expose.
pub trait Target {
    fn id(&self) -> &str;
    fn variable(&self, id: &str) -> Value;
    fn set_variable(&mut self, id: &str, value: Value);
    fn list(&self, id: &str) -> Vec<Value>;
    fn set_list(&mut self, id: &str, values: Vec<Value>);

    fn x(&self) -> f64;
    fn y(&self) -> f64;
    fn direction(&self) -> f64;
    fn size(&self) -> f64;
    fn visible(&self) -> bool;

    fn set_xy(&mut self, x: f64, y: f64);
    fn set_direction(&mut self, degrees: f64);
    fn say(&mut self, text: &str);
    fn think(&mut self, text: &str);
    fn set_effect(&mut self, name: &str, value: f64);
    fn point_towards(&mut self, x: f64, y: f64);
    /// Axis-aligned bounds in stage coordinates, used by motion blocks to
    /// implement fencing when `RuntimeOptions::fencing` is set.
    fn get_snapped_bounds(&self) -> (f64, f64, f64, f64);
    fn make_clone(&mut self) -> Option<String>;
}

/// A single cooperative thread of execution. `stop`/`wait`/`wait_for_timer`
/// are the suspension primitives the emitted code calls at every site the
/// generator marked `yields`.
pub trait Thread {
    fn stop(&mut self);
    fn wait(&mut self, seconds: f64);
    fn wait_for_timer(&mut self, timer_id: u64) -> bool;
    fn suspend(&mut self, tag: YieldTag);
    fn should_terminate(&self) -> bool;
}
