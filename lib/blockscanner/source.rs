use std::sync::Arc;

use futures::future::BoxFuture;

use crate::thorclient::types::{Keygens, TxOut};
use crate::thorclient::{ThorClientError, ThorchainClient};

/// Per-height keysign and keygen lookups used by the block processor.
///
/// Kept as a trait so the processor can run against scripted responses in tests.
pub trait BlockSource: Send + Sync {
    fn get_keysign<'a>(
        &'a self,
        height: i64,
        pub_key: &'a str,
    ) -> BoxFuture<'a, Result<TxOut, ThorClientError>>;

    fn get_keygens<'a>(
        &'a self,
        height: i64,
        pub_key: &'a str,
    ) -> BoxFuture<'a, Result<Keygens, ThorClientError>>;
}

/// Current statechain tip, polled by the common scanner.
pub trait ChainHeightSource: Send + Sync {
    fn get_statechain_height(&self) -> BoxFuture<'_, Result<i64, ThorClientError>>;
}

impl<T> BlockSource for Arc<T>
where
    T: BlockSource + ?Sized,
{
    fn get_keysign<'a>(
        &'a self,
        height: i64,
        pub_key: &'a str,
    ) -> BoxFuture<'a, Result<TxOut, ThorClientError>> {
        (**self).get_keysign(height, pub_key)
    }

    fn get_keygens<'a>(
        &'a self,
        height: i64,
        pub_key: &'a str,
    ) -> BoxFuture<'a, Result<Keygens, ThorClientError>> {
        (**self).get_keygens(height, pub_key)
    }
}

impl<T> ChainHeightSource for Arc<T>
where
    T: ChainHeightSource + ?Sized,
{
    fn get_statechain_height(&self) -> BoxFuture<'_, Result<i64, ThorClientError>> {
        (**self).get_statechain_height()
    }
}

impl BlockSource for ThorchainClient {
    fn get_keysign<'a>(
        &'a self,
        height: i64,
        pub_key: &'a str,
    ) -> BoxFuture<'a, Result<TxOut, ThorClientError>> {
        Box::pin(ThorchainClient::get_keysign(self, height, pub_key))
    }

    fn get_keygens<'a>(
        &'a self,
        height: i64,
        pub_key: &'a str,
    ) -> BoxFuture<'a, Result<Keygens, ThorClientError>> {
        Box::pin(ThorchainClient::get_keygens(self, height, pub_key))
    }
}

impl ChainHeightSource for ThorchainClient {
    fn get_statechain_height(&self) -> BoxFuture<'_, Result<i64, ThorClientError>> {
        Box::pin(ThorchainClient::get_statechain_height(self))
    }
}
