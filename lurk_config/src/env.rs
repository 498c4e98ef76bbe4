pub type Assign<T> = fn(&mut T, String);

/// Applies every environment variable in `keys` that is set, leaving the rest
/// of `this` untouched. Returns how many keys were applied.
pub fn override_from_env<T>(this: &mut T, keys: &[(&str, Assign<T>)]) -> usize {
    override_from(this, keys, |key| std::env::var(key).ok())
}

fn override_from<T>(
    this: &mut T,
    keys: &[(&str, Assign<T>)],
    lookup: impl Fn(&str) -> Option<String>,
) -> usize {
    log::trace!("loading env vars for: {}", std::any::type_name::<T>());

    keys.iter().fold(0, |count, (key, func)| {
        log::trace!("looking up {key}");
        match lookup(key) {
            Some(val) => {
                log::debug!("using '{key}' from the environment");
                func(this, val);
                count + 1
            }
            None => count,
        }
    })
}

/// Configuration sections that can be overridden from the environment.
pub trait FromEnv
where
    Self: Sized + 'static,
{
    const KEYS: &'static [(&'static str, Assign<Self>)];

    fn apply_env(&mut self) -> usize {
        override_from_env(self, Self::KEYS)
    }
}
