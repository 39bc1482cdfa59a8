// Operator command conditioning and closed-loop heading control
//
// Provides:
// - Joystick deadband and response curve
// - Per-axis slew rate limiting
// - PID controller
// - Heading lock state machine

pub mod heading_lock;
pub mod pid;
pub mod shaper;
pub mod slew;

pub use heading_lock::{HeadingLock, HeadingLockInput, LockState};
pub use pid::{PidController, PidGains};
pub use shaper::InputShaper;
pub use slew::SlewRateLimiter;
