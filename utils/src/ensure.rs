/// Early-return with `Err($err.into())` unless `$cond` holds.
///
/// Mirrors the teacher workspace's `utils::ensure!` — used at validation
/// boundaries so the happy path reads top-to-bottom without nested `if`s.
#[macro_export]
macro_rules! ensure {
    ($cond:expr, $err:expr) => {
        if !($cond) {
            return Err($err.into());
        }
    };
}
