use core::arch::{asm, naked_asm};

use crate::proc::ProcessEntry;

/// Words `switch` pops from an incoming stack before its return: six
/// callee-saved registers, then the return address.
const FRAME_WORDS: usize = 7;

/// Saves the outgoing stack pointer through `old_sp`, installs `new_sp`,
/// and returns into the frame it addresses.
///
/// Callee-saved registers travel on the stacks themselves: they are pushed
/// onto the outgoing stack before its pointer is captured and popped from
/// the incoming stack after the exchange, so the capture-before-install
/// ordering is fixed by the instruction sequence. `old_sp` may be null (a
/// process that deleted itself has no PCB to save into); the outgoing stack
/// is then abandoned unrecorded.
///
/// # Safety
///
/// `new_sp` must be a stack pointer recorded by this function or built by
/// [`prepare`], on a stack that no running process is using.
#[unsafe(naked)]
pub unsafe extern "C" fn switch(old_sp: *mut *mut u8, new_sp: *mut u8) {
    naked_asm!(
        "push rbp",
        "push rbx",
        "push r12",
        "push r13",
        "push r14",
        "push r15",
        "test rdi, rdi",
        "jz 2f",
        "mov [rdi], rsp",
        "2:",
        "mov rsp, rsi",
        "pop r15",
        "pop r14",
        "pop r13",
        "pop r12",
        "pop rbx",
        "pop rbp",
        "ret",
    )
}

/// Builds the initial switch frame at the top of a fresh stack and returns
/// the stack pointer to record in the new process's PCB.
///
/// The frame feeds [`switch`]'s restore path: zeroed callee-saved registers
/// -- except r12, which carries `entry` -- and [`process_entry`] as the
/// return address.
///
/// # Safety
///
/// `stack_base..stack_base + stack_size` must be valid for writes and
/// reserved for this stack.
pub unsafe fn prepare(stack_base: *mut u8, stack_size: usize, entry: ProcessEntry) -> *mut u8 {
    unsafe {
        // Align the top, then leave one spare word so the return from
        // `switch` lands with rsp ≡ 8 (mod 16), which is what the SysV ABI
        // promises a function on entry.
        let top = stack_base.map_addr(|addr| (addr + stack_size) & !0xF);
        let sp = top.sub((FRAME_WORDS + 1) * size_of::<usize>());
        #[expect(clippy::cast_ptr_alignment)]
        let frame = sp.cast::<usize>();
        for slot in 0..FRAME_WORDS {
            frame.add(slot).write(0);
        }
        frame.add(3).write(entry as usize); // popped into r12
        frame.add(FRAME_WORDS - 1).write(process_entry as usize); // return address
        sp
    }
}

/// Reads the live stack pointer; seeds the bootstrap PCB.
pub fn current_stack_pointer() -> *mut u8 {
    let sp: *mut u8;
    unsafe {
        asm!("mov {}, rsp", out(reg) sp, options(nomem, preserves_flags));
    }
    sp
}

/// Landing pad for the first switch into a new process: moves the entry
/// pointer from its callee-saved register into the first argument register
/// and tail-calls the portable half.
#[unsafe(naked)]
unsafe extern "C" fn process_entry() -> ! {
    naked_asm!(
        "mov rdi, r12",
        "jmp {start}",
        start = sym start,
    )
}

extern "C" fn start(entry: ProcessEntry) -> ! {
    crate::proc::run_process(entry)
}
