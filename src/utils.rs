use crate::error::{AppError, AppResult};
use std::sync::PoisonError;
use tokio::task;

pub async fn run_cpu_intensive<F, T>(func: F) -> AppResult<T>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    match task::spawn_blocking(func).await {
        Ok(res) => Ok(res),
        Err(e) => Err(AppError::from(e)),
    }
}

/// Locks a std mutex, recovering the guard if a previous holder panicked.
pub fn lock_or_recover<T>(mutex: &std::sync::Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
