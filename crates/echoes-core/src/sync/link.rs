use tokio::sync::mpsc;

/// One end of a duplex in-process channel: sends `S`, receives `R`.
#[derive(Debug)]
pub struct Link<S, R> {
    pub tx: mpsc::Sender<S>,
    pub rx: mpsc::Receiver<R>,
}

/// Two connected ends, each channel bounded to `capacity` messages.
///
/// # Panics
///
/// When `capacity` is zero.
#[must_use]
pub fn link_pair<A, B>(capacity: usize) -> (Link<A, B>, Link<B, A>) {
    let (a_tx, a_rx) = mpsc::channel(capacity);
    let (b_tx, b_rx) = mpsc::channel(capacity);
    (Link { tx: a_tx, rx: b_rx }, Link { tx: b_tx, rx: a_rx })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn ends_are_cross_connected() {
        let (mut left, mut right) = link_pair::<u8, &'static str>(1);
        left.tx.send(7).await.unwrap();
        right.tx.send("seven").await.unwrap();
        assert_eq!(right.rx.recv().await, Some(7));
        assert_eq!(left.rx.recv().await, Some("seven"));

        drop(left);
        assert_eq!(right.rx.recv().await, None);
    }
}
