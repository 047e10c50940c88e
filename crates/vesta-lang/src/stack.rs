//! Stack growth for deeply recursive parsing and evaluation.
//!
//! Parsing, compiling and interpreting all recurse over the syntax tree, and
//! interpreted calls recurse through [`Interpreter::call`](crate::Interpreter::call).
//! Wrapping those entry points in [`ensure_sufficient_stack`] moves deep
//! recursion onto heap-allocated stack segments, so a program reaches its
//! recursion limit or nesting limit instead of overflowing the thread that
//! runs it.

/// Grow when less than this much stack remains.
const RED_ZONE: usize = 128 * 1024;

/// Size of each newly allocated stack segment.
const SEGMENT_SIZE: usize = 2 * 1024 * 1024;

/// Run `f`, first moving to a fresh stack segment if the current one is
/// nearly exhausted.
#[inline]
#[cfg(not(target_arch = "wasm32"))]
pub(crate) fn ensure_sufficient_stack<R>(f: impl FnOnce() -> R) -> R {
    stacker::maybe_grow(RED_ZONE, SEGMENT_SIZE, f)
}

#[inline]
#[cfg(target_arch = "wasm32")]
pub(crate) fn ensure_sufficient_stack<R>(f: impl FnOnce() -> R) -> R {
    f()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deep_recursion_on_small_thread() {
        fn depth(n: u64) -> u64 {
            ensure_sufficient_stack(|| if n == 0 { 0 } else { depth(n - 1) + 1 })
        }

        let handle = std::thread::Builder::new()
            .stack_size(256 * 1024)
            .spawn(|| depth(100_000))
            .unwrap();
        assert_eq!(handle.join().unwrap(), 100_000);
    }

    #[test]
    fn test_passes_result_through() {
        let result: Result<i32, &str> = ensure_sufficient_stack(|| Err("no"));
        assert_eq!(result, Err("no"));
    }
}
