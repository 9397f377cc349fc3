pub mod pic;

use crate::devices::timer::TIMER_FREQ;

/// Bring up the interrupt controller and the periodic tick source.
pub fn init() {
    pic::init_pic();
    pic::init_pit(TIMER_FREQ);
}
