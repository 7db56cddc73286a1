//! Runtime invariant enforcement.
//!
//! A violated invariant means the runtime's own bookkeeping is corrupted.
//! These are never turned into `Result`s and are never caught at the wire
//! boundary: they panic.

pub const POOL_REFCOUNT: u32 = 1;
pub const POOL_HANDLE: u32 = 2;
pub const SCOPED_BINDING: u32 = 3;
pub const WIRE_STATE: u32 = 4;

/// Assert an invariant: logs it and panics on failure.
#[track_caller]
pub(crate) fn assert_invariant(id: u32, condition: bool, message: &str, context: Option<&str>) {
    if condition {
        return;
    }
    let full_message = match context {
        Some(ctx) => format!("Invariant {id} failed: {message} (context: {ctx})"),
        None => format!("Invariant {id} failed: {message}"),
    };
    log::error!("{full_message}");
    panic!("{full_message}");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn holding_invariant_is_silent() {
        assert_invariant(WIRE_STATE, true, "never shown", None);
    }

    #[test]
    #[should_panic(expected = "Invariant 1 failed: bad count (context: pool)")]
    fn violated_invariant_panics() {
        assert_invariant(POOL_REFCOUNT, false, "bad count", Some("pool"));
    }
}
