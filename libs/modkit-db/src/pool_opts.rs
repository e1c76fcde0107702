//! Pool knobs applied the same way for every backend.

use crate::ConnectOpts;

pub(crate) trait ApplyPoolOpts<T> {
    fn apply(self, opts: &ConnectOpts) -> Self;
}

macro_rules! impl_apply_pool_opts {
    ($($feature:literal => $options:ty),* $(,)?) => {$(
        #[cfg(feature = $feature)]
        impl ApplyPoolOpts<$options> for $options {
            fn apply(mut self, opts: &ConnectOpts) -> Self {
                if let Some(n) = opts.max_conns {
                    self = self.max_connections(n);
                }
                if let Some(n) = opts.min_conns {
                    self = self.min_connections(n);
                }
                if let Some(t) = opts.acquire_timeout {
                    self = self.acquire_timeout(t);
                }
                if let Some(t) = opts.idle_timeout {
                    self = self.idle_timeout(t);
                }
                if let Some(t) = opts.max_lifetime {
                    self = self.max_lifetime(t);
                }
                if opts.test_before_acquire {
                    self = self.test_before_acquire(true);
                }
                self
            }
        }
    )*};
}

impl_apply_pool_opts! {
    "mysql" => sqlx::mysql::MySqlPoolOptions,
    "sqlite" => sqlx::sqlite::SqlitePoolOptions,
}
