//! Ledger of strings handed across the ABI.
//!
//! Every pointer returned to C is recorded here. Releasing a pointer that
//! is not in the ledger (a static, a foreign allocation, a second free) is
//! ignored rather than handed to the allocator.

use std::collections::HashSet;
use std::ffi::CString;
use std::os::raw::c_char;
use std::sync::OnceLock;

use log::warn;
use parking_lot::Mutex;

fn outstanding() -> &'static Mutex<HashSet<usize>> {
    static OUTSTANDING: OnceLock<Mutex<HashSet<usize>>> = OnceLock::new();
    OUTSTANDING.get_or_init(|| Mutex::new(HashSet::new()))
}

/// Move `text` to the C heap and record the pointer. Interior NUL bytes are
/// dropped since C could never see past them.
pub fn into_raw(text: String) -> *const c_char {
    let owned = CString::new(text).unwrap_or_else(|err| {
        let mut bytes = err.into_vec();
        bytes.retain(|b| *b != 0);
        CString::new(bytes).unwrap_or_default()
    });
    let ptr = owned.into_raw();
    outstanding().lock().insert(ptr as usize);
    ptr
}

/// Free a pointer previously produced by [`into_raw`].
///
/// # Safety
/// `ptr` must be null or a pointer returned by this crate; the caller must
/// not use it afterwards.
pub unsafe fn release(ptr: *const c_char) {
    if ptr.is_null() {
        return;
    }
    if !outstanding().lock().remove(&(ptr as usize)) {
        warn!("ignoring release of unknown or already released string {ptr:p}");
        return;
    }
    drop(CString::from_raw(ptr as *mut c_char));
}

#[cfg(test)]
pub(crate) fn is_outstanding(ptr: *const c_char) -> bool {
    outstanding().lock().contains(&(ptr as usize))
}

/// Serialises tests that hand out strings and checks that each one leaves
/// the ledger as it found it.
#[cfg(test)]
pub(crate) struct LedgerCheck {
    _serial: parking_lot::MutexGuard<'static, ()>,
    before: usize,
}

#[cfg(test)]
impl LedgerCheck {
    pub(crate) fn begin() -> Self {
        static SERIAL: Mutex<()> = Mutex::new(());
        let serial = SERIAL.lock();
        Self {
            _serial: serial,
            before: outstanding().lock().len(),
        }
    }
}

#[cfg(test)]
impl Drop for LedgerCheck {
    fn drop(&mut self) {
        if !std::thread::panicking() {
            assert_eq!(outstanding().lock().len(), self.before, "strings left unreleased");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::ffi::CStr;

    #[test]
    fn strings_are_released_once() {
        let _ledger = LedgerCheck::begin();
        let ptr = into_raw("{\"ok\":true}".to_string());
        assert!(is_outstanding(ptr));
        assert_eq!(unsafe { CStr::from_ptr(ptr) }.to_str().unwrap(), "{\"ok\":true}");

        unsafe { release(ptr) };
        assert!(!is_outstanding(ptr));
        // nothing else allocates while the ledger is held, so this is a true double free
        unsafe { release(ptr) };
    }

    #[test]
    fn interior_nul_is_stripped() {
        let _ledger = LedgerCheck::begin();
        let ptr = into_raw("a\0b".to_string());
        assert_eq!(unsafe { CStr::from_ptr(ptr) }.to_bytes(), b"ab");
        unsafe { release(ptr) };
    }

    #[test]
    fn foreign_pointers_are_ignored() {
        let _ledger = LedgerCheck::begin();
        static FOREIGN: &[u8] = b"static\0";
        unsafe { release(FOREIGN.as_ptr() as *const c_char) };
        unsafe { release(std::ptr::null()) };
    }
}
