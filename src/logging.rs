/// Initializes `env_logger` exactly once, honoring `--log-level`/`-v`
/// ahead of `RUST_LOG` if set (spec.md §6 ambient logging).
pub fn init(level: &str) {
    let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).try_init();
}
