// keystash/keystash-wasm-utils
//
// Copyright: 2023, Marc Bauer <mb@nesium.com>
// License: Mozilla Public License v2.0 (MPL v2.0)

use futures::{Stream, StreamExt};

impl<T: ?Sized> KeystashStreamExt for T where T: Stream {}

pub trait KeystashStreamExt: Stream {
    #[cfg(target_arch = "wasm32")]
    fn keystash_boxed<'a>(self) -> futures::stream::LocalBoxStream<'a, Self::Item>
    where
        Self: Sized + 'a,
    {
        self.boxed_local()
    }

    #[cfg(not(target_arch = "wasm32"))]
    fn keystash_boxed<'a>(self) -> futures::stream::BoxStream<'a, Self::Item>
    where
        Self: Sized + Send + 'a,
    {
        self.boxed()
    }
}

#[cfg(test)]
mod tests {
    use futures::stream;

    use super::*;

    #[tokio::test]
    async fn test_boxed_stream_yields_all_items() {
        let boxed = stream::iter(vec![1, 2, 3]).keystash_boxed();
        let items = boxed.collect::<Vec<_>>().await;
        assert_eq!(items, vec![1, 2, 3]);
    }
}
