/*
 * x86_64 Architecture Support
 *
 * Architecture-specific plumbing for the Tern kernel: segment descriptors,
 * the interrupt descriptor table, and interrupt-flag control. Everything
 * above this layer is architecture-neutral.
 */

pub mod gdt;
pub mod idt;
pub mod interrupts;
