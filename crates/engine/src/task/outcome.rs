/// A task handler's result. `Pending` is the async-result sentinel
/// (§7): the worker must not emit `TaskSucceeded`/`TaskFailed` — a
/// later out-of-band `SendTaskSuccess`/`SendTaskFailure` call using the
/// handler's own task token will do so instead.
#[derive(Debug, Clone)]
pub enum TaskOutcome<T> {
    Completed(T),
    Pending,
}

impl<T> TaskOutcome<T> {
    pub fn completed(value: T) -> Self {
        TaskOutcome::Completed(value)
    }

    pub fn is_pending(&self) -> bool {
        matches!(self, TaskOutcome::Pending)
    }
}
