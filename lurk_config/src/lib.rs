mod secret;
pub use secret::Secret;

mod env;
pub use env::{override_from_env, Assign, FromEnv};

mod file;
pub use file::load_from_file;

fn redact(s: &str) -> impl std::fmt::Debug {
    struct NoDebug(String);
    impl std::fmt::Debug for NoDebug {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            f.write_str(&self.0)
        }
    }

    NoDebug(format!("{{len = {}}}", s.len()))
}
