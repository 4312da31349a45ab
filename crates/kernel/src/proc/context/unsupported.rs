use crate::proc::ProcessEntry;

pub unsafe extern "C" fn switch(_old_sp: *mut *mut u8, _new_sp: *mut u8) {
    unimplemented!("unsupported architecture");
}

pub unsafe fn prepare(_stack_base: *mut u8, _stack_size: usize, _entry: ProcessEntry) -> *mut u8 {
    unimplemented!("unsupported architecture");
}

pub fn current_stack_pointer() -> *mut u8 {
    unimplemented!("unsupported architecture");
}
