use once_cell::sync::OnceCell;
use std::pin::pin;
use tokio::sync::Notify;

/// A single-assignment cell with any number of waiting readers.
///
/// The first `set` wins and wakes every waiter; later `set` calls hand their value back.
#[derive(Debug)]
pub(crate) struct Latch<T> {
    value: OnceCell<T>,
    notify: Notify,
}

impl<T> Latch<T> {
    pub(crate) fn new() -> Self {
        Self {
            value: OnceCell::new(),
            notify: Notify::new(),
        }
    }

    pub(crate) fn set(&self, value: T) -> Result<(), T> {
        self.value.set(value)?;
        self.notify.notify_waiters();
        Ok(())
    }

    pub(crate) fn get(&self) -> Option<&T> {
        self.value.get()
    }

    pub(crate) async fn wait(&self) -> &T {
        loop {
            let mut notified = pin!(self.notify.notified());
            notified.as_mut().enable();
            if let Some(value) = self.value.get() {
                return value;
            }
            notified.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn test_first_set_wins() {
        let latch = Latch::new();
        assert!(latch.set(1).is_ok());
        assert_eq!(latch.set(2), Err(2));
        assert_eq!(latch.get(), Some(&1));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_all_waiters_see_the_value() {
        let latch = Arc::new(Latch::new());
        let waiters: Vec<_> = (0..3)
            .map(|_| {
                let latch = latch.clone();
                tokio::spawn(async move { *latch.wait().await })
            })
            .collect();

        tokio::time::sleep(Duration::from_millis(10)).await;
        latch.set("done").unwrap();

        for waiter in waiters {
            assert_eq!(waiter.await.unwrap(), "done");
        }
        assert_eq!(*latch.wait().await, "done");
    }
}
