/*
 * 8259 PIC and PIT Channel 0
 *
 * The PIC pair is remapped above the exception vectors and everything but
 * IRQ0 is masked: the tick is the only hardware interrupt this kernel
 * takes. The PIT is programmed in square-wave mode to fire at TIMER_FREQ.
 */

use pic8259::ChainedPics;
use spin::Mutex;
use x86_64::instructions::port::Port;

/// Master PIC vector offset (IRQ0 lands on vector 32).
pub const PIC_1_OFFSET: u8 = 32;
/// Slave PIC vector offset.
pub const PIC_2_OFFSET: u8 = PIC_1_OFFSET + 8;

static PICS: Mutex<ChainedPics> =
    Mutex::new(unsafe { ChainedPics::new(PIC_1_OFFSET, PIC_2_OFFSET) });

/// Remap the PICs and mask every IRQ except the timer.
pub fn init_pic() {
    unsafe {
        PICS.lock().initialize();

        // Mask register: bit set = IRQ masked. Leave only IRQ0 open.
        let mut master_data = Port::<u8>::new(0x21);
        let mut slave_data = Port::<u8>::new(0xA1);
        master_data.write(0xFEu8);
        slave_data.write(0xFFu8);
    }

    log::info!("PIC remapped to vectors {}..{}", PIC_1_OFFSET, PIC_2_OFFSET + 8);
}

/// Program PIT channel 0 for periodic interrupts at `frequency_hz`.
pub fn init_pit(frequency_hz: u32) {
    // 19 Hz is the slowest a 16-bit divisor can express; above 1 kHz the
    // tick handler would not keep up with the inter-tick interval.
    assert!((19..=1000).contains(&frequency_hz), "PIT frequency out of range");

    let pit_frequency: u32 = 1_193_182; // Hz, PIT base oscillator
    let divisor: u16 = (pit_frequency / frequency_hz) as u16;

    unsafe {
        let mut command = Port::<u8>::new(0x43);
        let mut channel0 = Port::<u8>::new(0x40);

        // Channel 0, access mode lo/hi, mode 3 (square wave), binary
        command.write(0x36u8);
        channel0.write((divisor & 0xFF) as u8);
        channel0.write((divisor >> 8) as u8);
    }

    log::info!("PIT configured for {}Hz tick (divisor {})", frequency_hz, divisor);
}

/// Signal end-of-interrupt for the given vector.
///
/// Called from interrupt handlers, where the interrupt flag is already
/// clear, so the spin lock cannot be contended on this single CPU.
pub fn end_of_interrupt(vector: u8) {
    unsafe {
        PICS.lock().notify_end_of_interrupt(vector);
    }
}
