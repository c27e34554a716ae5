use tokio::sync::RwLock;

/// Last-write-wins cache slot for one data category. Holds nothing until the
/// first successful poll; readers always get a clone of whatever was stored
/// last and never wait on a fetch. A failed refresh simply skips the store,
/// leaving the previous value in place.
#[derive(Debug, Default)]
pub struct MetricCell<T> {
    inner: RwLock<Option<T>>,
}

impl<T: Clone> MetricCell<T> {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(None),
        }
    }

    pub async fn store(&self, value: T) {
        *self.inner.write().await = Some(value);
    }

    pub async fn load(&self) -> Option<T> {
        self.inner.read().await.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn empty_until_first_store() {
        let cell: MetricCell<u64> = MetricCell::new();
        assert_eq!(cell.load().await, None);
        cell.store(7).await;
        assert_eq!(cell.load().await, Some(7));
    }

    #[tokio::test]
    async fn store_replaces_wholesale() {
        let cell = MetricCell::new();
        cell.store(vec![1, 2, 3]).await;
        cell.store(vec![9]).await;
        assert_eq!(cell.load().await, Some(vec![9]));
    }
}
