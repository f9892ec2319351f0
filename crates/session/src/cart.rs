//! Local-first cart store.
//!
//! Mutations apply to the local cart and its persisted copy synchronously and
//! return the new state at once. When a session exists, the same mutation is
//! mirrored to the remote cart on a background task through the
//! [`SessionClient`], so it gets the same bearer handling and renewal as any
//! other request. Mirror failures are logged and dropped; the local cart is
//! never rolled back.
//!
//! Mirrors run one at a time in mutation order: each task waits for the
//! previous one to finish before sending, so an add followed by a remove of
//! the same line cannot reach the server reversed. A mirror that never
//! completes holds back the ones after it until the store is dropped.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::Serialize;
use serde_json::json;
use storefront_core::{Cart, CartError, CartKey, CartLineItem, Price, QuantityChange};
use tokio::sync::oneshot;
use tokio::task::JoinSet;
use tracing::Instrument;

use crate::client::{ApiRequest, SessionClient};
use crate::error::ClientError;
use crate::persistence::{KeyValueStore, keys, load_json, save_json};
use crate::transport::Transport;

const CART_PATH: &str = "cart";
const CART_ITEMS_PATH: &str = "cart/items";

#[derive(Serialize)]
struct QuantityUpdate<'a> {
    #[serde(flatten)]
    key: &'a CartKey,
    quantity: u32,
}

/// Background mirror tasks and the completion signal of the newest one.
#[derive(Default)]
struct Mirrors {
    tasks: JoinSet<()>,
    tail: Option<oneshot::Receiver<()>>,
}

/// The shopper's cart, persisted locally and mirrored remotely.
///
/// Mirror tasks belong to the store: dropping it aborts any still running.
pub struct CartStore<T> {
    cart: Mutex<Cart>,
    backend: Arc<dyn KeyValueStore>,
    client: SessionClient<T>,
    mirrors: Mutex<Mirrors>,
}

impl<T: Transport> CartStore<T> {
    /// Create a store, restoring the persisted cart from `backend`.
    ///
    /// Missing or corrupt data starts with an empty cart.
    #[must_use]
    pub fn load(client: SessionClient<T>, backend: Arc<dyn KeyValueStore>) -> Self {
        let cart: Cart = load_json(backend.as_ref(), keys::CART).unwrap_or_default();
        tracing::debug!(lines = cart.items().len(), "Loaded local cart");
        Self {
            cart: Mutex::new(cart),
            backend,
            client,
            mirrors: Mutex::new(Mirrors::default()),
        }
    }

    /// Copy of the current cart.
    #[must_use]
    pub fn snapshot(&self) -> Cart {
        self.lock().clone()
    }

    #[must_use]
    pub fn item_count(&self) -> u32 {
        self.lock().item_count()
    }

    #[must_use]
    pub fn subtotal(&self) -> Price {
        self.lock().subtotal()
    }

    /// Add a line, merging with an existing line of the same product and
    /// variant.
    ///
    /// # Errors
    ///
    /// Returns `CartError` if the quantity is zero or the currency differs
    /// from the cart's; the cart is unchanged.
    pub fn add_item(&self, item: CartLineItem) -> Result<Cart, CartError> {
        let request = ApiRequest::post(CART_ITEMS_PATH).json(&item);
        let cart = self.mutate(|cart| cart.add(item).map(|_| ()))?;
        self.mirror_json(request);
        Ok(cart)
    }

    /// Remove the line with exactly this key. Unknown keys change nothing.
    pub fn remove_item(&self, key: &CartKey) -> Cart {
        let mut removed = false;
        let cart = self.mutate_infallible(|cart| removed = cart.remove(key).is_some());

        if removed {
            self.mirror_json(ApiRequest::delete(CART_ITEMS_PATH).json(key));
        }
        cart
    }

    /// Set a line's quantity. Zero removes the line; unknown keys change
    /// nothing.
    pub fn update_quantity(&self, key: &CartKey, quantity: u32) -> Cart {
        let mut change = QuantityChange::Missing;
        let cart = self.mutate_infallible(|cart| change = cart.set_quantity(key, quantity));

        match change {
            QuantityChange::Updated => self.mirror_json(
                ApiRequest::patch(CART_ITEMS_PATH).json(&QuantityUpdate { key, quantity }),
            ),
            QuantityChange::Removed => {
                self.mirror_json(ApiRequest::delete(CART_ITEMS_PATH).json(key));
            }
            QuantityChange::Missing => {
                tracing::debug!(product_id = %key.product_id, "No cart line to update");
            }
        }
        cart
    }

    /// Empty the cart.
    pub fn clear(&self) -> Cart {
        let cart = self.mutate_infallible(|cart| {
            cart.clear();
        });
        self.mirror(ApiRequest::delete(CART_PATH));
        cart
    }

    /// Replace the remote cart with the local one and wait for the result.
    ///
    /// # Errors
    ///
    /// Returns `ClientError::NotAuthenticated` without a session, otherwise
    /// the error of the remote call.
    #[tracing::instrument(skip(self))]
    pub async fn sync_to_remote(&self) -> Result<(), ClientError> {
        if !self.client.is_authenticated() {
            return Err(ClientError::NotAuthenticated);
        }
        let cart = self.snapshot();
        let request = ApiRequest::put(CART_PATH).with_body(json!({ "items": cart }));
        self.client.request_value(&request).await?;
        tracing::info!(lines = cart.items().len(), "Remote cart replaced from local cart");
        Ok(())
    }

    /// Wait for every mirror call started so far to finish.
    pub async fn flush(&self) {
        let mut pending = std::mem::take(&mut self.lock_mirrors().tasks);
        tracing::debug!(pending = pending.len(), "Waiting for cart mirrors");
        while pending.join_next().await.is_some() {}
    }

    fn mutate<E>(&self, apply: impl FnOnce(&mut Cart) -> Result<(), E>) -> Result<Cart, E> {
        let mut cart = self.lock();
        apply(&mut cart)?;
        save_json(self.backend.as_ref(), keys::CART, &*cart);
        Ok(cart.clone())
    }

    fn mutate_infallible(&self, apply: impl FnOnce(&mut Cart)) -> Cart {
        let mut cart = self.lock();
        apply(&mut cart);
        save_json(self.backend.as_ref(), keys::CART, &*cart);
        cart.clone()
    }

    fn mirror_json(&self, request: Result<ApiRequest, serde_json::Error>) {
        match request {
            Ok(request) => self.mirror(request),
            Err(e) => tracing::warn!(error = %e, "Failed to encode cart mutation for mirroring"),
        }
    }

    /// Send `request` on a background task if a session exists.
    fn mirror(&self, request: ApiRequest) {
        if !self.client.is_authenticated() {
            return;
        }
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            tracing::debug!("No async runtime, skipping remote cart mirror");
            return;
        };

        let client = self.client.clone();
        let span = tracing::info_span!(
            "cart_mirror",
            method = %request.method(),
            path = request.path()
        );
        let (done, finished) = oneshot::channel();
        let mut mirrors = self.lock_mirrors();
        let previous = mirrors.tail.replace(finished);
        // Reap finished mirrors so the set does not grow without bound.
        while mirrors.tasks.try_join_next().is_some() {}
        mirrors.tasks.spawn_on(
            async move {
                // Resolves once the previous mirror finishes or is aborted.
                if let Some(previous) = previous {
                    let _ = previous.await;
                }
                if let Err(e) = client.request_value(&request).await {
                    tracing::warn!(error = %e, "Remote cart mirror failed");
                }
                let _ = done.send(());
            }
            .instrument(span),
            &runtime,
        );
    }

    fn lock(&self) -> MutexGuard<'_, Cart> {
        self.cart.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_mirrors(&self) -> MutexGuard<'_, Mirrors> {
        self.mirrors.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::indexing_slicing)]
mod tests {
    use std::time::Duration;

    use reqwest::Method;
    use storefront_core::{CurrencyCode, DisplayFields, Variant};

    use super::*;
    use crate::persistence::MemoryStore;
    use crate::testing::{FakeServer, client_for, signed_in_client};

    fn line(product: &str, size: &str, color: &str, quantity: u32) -> CartLineItem {
        CartLineItem::new(
            product,
            Variant::new(size, color),
            quantity,
            Price::from_minor_units(1999, CurrencyCode::USD),
            DisplayFields {
                name: format!("{product} hoodie"),
                image: None,
            },
        )
        .unwrap()
    }

    fn store(client: SessionClient<FakeServer>) -> CartStore<FakeServer> {
        CartStore::load(client, Arc::new(MemoryStore::new()))
    }

    #[tokio::test]
    async fn test_add_same_variant_twice_merges() {
        let server = FakeServer::new();
        let cart = store(signed_in_client(&server));

        cart.add_item(line("P1", "M", "red", 1)).unwrap();
        let state = cart.add_item(line("P1", "M", "red", 1)).unwrap();

        assert_eq!(state.items().len(), 1);
        assert_eq!(state.items()[0].quantity, 2);
        assert_eq!(cart.item_count(), 2);
        assert_eq!(cart.subtotal().to_string(), "$39.98");

        let calls = server.wait_for_calls(2).await;
        assert!(
            calls
                .iter()
                .all(|c| c.method == Method::POST && c.path == "cart/items")
        );
        assert_eq!(calls[0].bearer.as_deref(), Some("access-0"));
    }

    #[tokio::test]
    async fn test_remove_only_exact_key() {
        let server = FakeServer::new();
        let cart = store(signed_in_client(&server));
        cart.add_item(line("P1", "M", "red", 1)).unwrap();
        cart.add_item(line("P1", "M", "blue", 1)).unwrap();

        let state = cart.remove_item(&CartKey::new("P1", "M", "red"));
        assert_eq!(state.items().len(), 1);
        assert_eq!(state.items()[0].variant.color, "blue");

        let calls = server.wait_for_calls(3).await;
        let delete = calls.iter().find(|c| c.method == Method::DELETE).unwrap();
        assert_eq!(delete.path, "cart/items");
        let body = delete.body.as_ref().unwrap();
        assert_eq!(body["productId"], "P1");
        assert_eq!(body["color"], "red");
    }

    #[tokio::test]
    async fn test_local_state_visible_while_mirror_hangs() {
        let server = FakeServer::new();
        server.hang_path("cart/items");
        let cart = store(signed_in_client(&server));

        let state = cart.add_item(line("P1", "M", "red", 3)).unwrap();
        assert_eq!(state.item_count(), 3);
        assert_eq!(cart.snapshot(), state);

        // The mirror call was issued and is still outstanding.
        server.wait_for_calls(1).await;
        assert_eq!(cart.item_count(), 3);
    }

    #[tokio::test]
    async fn test_mirror_failure_keeps_local_state() {
        let server = FakeServer::new();
        server.fail_path("cart/items");
        let cart = store(signed_in_client(&server));

        cart.add_item(line("P1", "M", "red", 1)).unwrap();
        cart.flush().await;

        assert_eq!(server.calls().len(), 1);
        assert_eq!(cart.item_count(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_mirrors_reach_server_in_mutation_order() {
        let server = FakeServer::new().with_refresh_delay(Duration::from_millis(30));
        let cart = store(signed_in_client(&server));
        let key = CartKey::new("P1", "M", "red");
        server.expire_access_token();

        // The add stalls on renewal; the later mutations must queue behind it.
        cart.add_item(line("P1", "M", "red", 1)).unwrap();
        cart.update_quantity(&key, 3);
        cart.remove_item(&key);
        cart.flush().await;

        let sent: Vec<_> = server
            .calls()
            .into_iter()
            .map(|c| (c.method, c.path))
            .collect();
        assert_eq!(
            sent,
            vec![
                (Method::POST, "cart/items".to_string()),
                (Method::POST, "auth/refresh".to_string()),
                (Method::POST, "cart/items".to_string()),
                (Method::PATCH, "cart/items".to_string()),
                (Method::DELETE, "cart/items".to_string()),
            ]
        );
        assert_eq!(server.refresh_calls(), 1);
    }

    #[tokio::test]
    async fn test_no_session_stays_local() {
        let server = FakeServer::new();
        let cart = store(client_for(&server));

        cart.add_item(line("P1", "M", "red", 1)).unwrap();
        cart.update_quantity(&CartKey::new("P1", "M", "red"), 4);
        cart.clear();
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert!(server.calls().is_empty());
    }

    #[tokio::test]
    async fn test_update_quantity() {
        let server = FakeServer::new();
        let cart = store(signed_in_client(&server));
        let key = CartKey::new("P1", "M", "red");
        cart.add_item(line("P1", "M", "red", 1)).unwrap();

        let state = cart.update_quantity(&key, 5);
        assert_eq!(state.get(&key).unwrap().quantity, 5);

        let patch = server
            .wait_for_calls(2)
            .await
            .into_iter()
            .find(|c| c.method == Method::PATCH)
            .unwrap();
        let body = patch.body.unwrap();
        assert_eq!(body["productId"], "P1");
        assert_eq!(body["quantity"], 5);

        let state = cart.update_quantity(&key, 0);
        assert!(state.is_empty());
        server.wait_for_calls(3).await;
    }

    #[tokio::test]
    async fn test_unknown_key_is_noop() {
        let server = FakeServer::new();
        let cart = store(signed_in_client(&server));
        cart.add_item(line("P1", "M", "red", 1)).unwrap();
        server.wait_for_calls(1).await;

        let before = cart.snapshot();
        assert_eq!(cart.update_quantity(&CartKey::new("P9", "M", "red"), 2), before);
        assert_eq!(cart.remove_item(&CartKey::new("P1", "S", "red")), before);
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert_eq!(server.calls().len(), 1);
    }

    #[tokio::test]
    async fn test_invalid_add_changes_nothing() {
        let server = FakeServer::new();
        let cart = store(signed_in_client(&server));
        cart.add_item(line("P1", "M", "red", 1)).unwrap();

        let mut euro = line("P2", "M", "red", 1);
        euro.unit_price = Price::from_minor_units(1999, CurrencyCode::EUR);
        assert!(matches!(
            cart.add_item(euro),
            Err(CartError::CurrencyMismatch { .. })
        ));

        let mut zero = line("P1", "M", "red", 1);
        zero.quantity = 0;
        assert_eq!(cart.add_item(zero), Err(CartError::InvalidQuantity));

        assert_eq!(cart.item_count(), 1);
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(server.calls().len(), 1);
    }

    #[test]
    fn test_persists_and_restores_without_runtime() {
        let server = FakeServer::new();
        let backend: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());

        let cart = CartStore::load(signed_in_client(&server), Arc::clone(&backend));
        cart.add_item(line("P1", "M", "red", 2)).unwrap();
        cart.add_item(line("P2", "L", "black", 1)).unwrap();

        let restored = CartStore::load(client_for(&server), backend);
        assert_eq!(restored.snapshot(), cart.snapshot());
        assert_eq!(restored.item_count(), 3);
        assert!(server.calls().is_empty());
    }

    #[test]
    fn test_corrupt_persisted_cart_starts_empty() {
        let backend = Arc::new(MemoryStore::new());
        backend.write(keys::CART, "not json").unwrap();
        let cart = CartStore::load(client_for(&FakeServer::new()), backend);
        assert!(cart.snapshot().is_empty());
    }

    #[tokio::test]
    async fn test_sync_to_remote() {
        let server = FakeServer::new();
        let anonymous = store(client_for(&server));
        assert!(matches!(
            anonymous.sync_to_remote().await,
            Err(ClientError::NotAuthenticated)
        ));

        let cart = CartStore::load(signed_in_client(&server), Arc::new(MemoryStore::new()));
        cart.add_item(line("P1", "M", "red", 2)).unwrap();
        cart.sync_to_remote().await.unwrap();

        let put = server
            .wait_for_calls(2)
            .await
            .into_iter()
            .find(|c| c.method == Method::PUT)
            .unwrap();
        assert_eq!(put.path, "cart");
        let items = &put.body.unwrap()["items"];
        assert_eq!(items[0]["productId"], "P1");
        assert_eq!(items[0]["quantity"], 2);
    }
}
