//! The stack-swap context switch.
//!
//! Everything the scheduler does is ordinary code except the moment control
//! moves between stacks. That moment is isolated here behind a minimal
//! contract: save the outgoing stack pointer, install the incoming one, and
//! return into whatever frame it addresses. For a process that has never
//! run, [`prepare`] builds that frame by hand so the first switch into it
//! enters the start routine.

#[cfg_attr(target_arch = "x86_64", path = "context/x86_64.rs")]
#[cfg_attr(not(target_arch = "x86_64"), path = "context/unsupported.rs")]
mod imp;

pub(super) use self::imp::{current_stack_pointer, prepare, switch};
