/// Helper macro to execute a system call that returns an `io::Result`.
macro_rules! syscall {
    ($fn: ident ( $($arg: expr),* $(,)* ) ) => {{
        let res = unsafe { libc::$fn($($arg, )*) };
        if res == -1 {
            Err(std::io::Error::last_os_error())
        } else {
            Ok(res)
        }
    }};
}

/// Helper macro to implement a `Debug` breakdown of the set bits in an
/// integer flags value, used for pretty-printing raw OS event structures.
macro_rules! debug_detail {
    (
        $type: ident ($int_type: ty), $test: path,
        $($(#[$attr: meta])* $flag: path),+ $(,)*
    ) => {
        struct $type($int_type);

        impl std::fmt::Debug for $type {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                let mut written_one = false;
                $(
                    $(#[$attr])*
                    #[allow(clippy::bad_bit_mask)]
                    if $test(&self.0, &$flag) {
                        if written_one {
                            f.write_str(" | ")?;
                        } else {
                            written_one = true;
                        }
                        f.write_str(stringify!($flag))?;
                    }
                )+
                if !written_one {
                    f.write_str("(empty)")?;
                }
                Ok(())
            }
        }
    };
}
