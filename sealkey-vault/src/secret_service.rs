//! Freedesktop Secret Service client.
//!
//! Stores each passphrase as an item in the default collection, keyed by the
//! attributes `service=<namespace>` and `account=<key id>`.  If the collection
//! is locked, the service's own unlock prompt is driven to completion before
//! the read; a dismissed prompt fails the single operation.
//!
//! Sessions use the `plain` algorithm: the secret only crosses the session
//! bus, which is private to the user.

use std::collections::HashMap;

use async_trait::async_trait;
use futures_util::TryStreamExt;
use sealkey_core::{Error, Result};
use tokio::sync::OnceCell;
use tracing::debug;
use zbus::Connection;
use zeroize::Zeroizing;
use zvariant::{OwnedObjectPath, OwnedValue, Value};

use crate::store::CredentialStore;

const DEST: &str = "org.freedesktop.secrets";
const SERVICE_PATH: &str = "/org/freedesktop/secrets";
const DEFAULT_COLLECTION: &str = "/org/freedesktop/secrets/aliases/default";
const SERVICE_IFACE: &str = "org.freedesktop.Secret.Service";
const COLLECTION_IFACE: &str = "org.freedesktop.Secret.Collection";
const ITEM_IFACE: &str = "org.freedesktop.Secret.Item";
const PROMPT_IFACE: &str = "org.freedesktop.Secret.Prompt";

/// `(session, parameters, value, content_type)` as defined by the Secret Service API.
type SecretStruct = (OwnedObjectPath, Vec<u8>, Vec<u8>, String);

#[derive(Default)]
pub struct SecretServiceStore {
    conn: OnceCell<Connection>,
}

impl std::fmt::Debug for SecretServiceStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecretServiceStore")
            .field("connected", &self.conn.initialized())
            .finish()
    }
}

fn store_err(context: &str, e: zbus::Error) -> Error {
    Error::Store(format!("{context}: {e}"))
}

impl SecretServiceStore {
    pub fn new() -> Self {
        Self::default()
    }

    async fn conn(&self) -> Result<&Connection> {
        self.conn
            .get_or_try_init(|| async {
                Connection::session()
                    .await
                    .map_err(|e| Error::CapabilityUnavailable(format!("session bus: {e}")))
            })
            .await
    }

    async fn proxy(&self, path: &str, iface: &'static str) -> Result<zbus::Proxy<'static>> {
        let conn = self.conn().await?.clone();
        zbus::Proxy::new(&conn, DEST, path.to_string(), iface)
            .await
            .map_err(|e| store_err("proxy", e))
    }

    async fn open_session(&self) -> Result<OwnedObjectPath> {
        let service = self.proxy(SERVICE_PATH, SERVICE_IFACE).await?;
        let (_, session): (OwnedValue, OwnedObjectPath) = service
            .call("OpenSession", &("plain", Value::from("")))
            .await
            .map_err(|e| store_err("OpenSession", e))?;
        Ok(session)
    }

    async fn close_session(&self, session: &OwnedObjectPath) {
        let result = async {
            let proxy = self.proxy(session.as_str(), "org.freedesktop.Secret.Session").await?;
            proxy
                .call::<_, _, ()>("Close", &())
                .await
                .map_err(|e| store_err("Session.Close", e))
        }
        .await;
        if let Err(e) = result {
            debug!(error = %e, "failed to close secret service session");
        }
    }

    /// Return unlocked item paths matching `attrs`, unlocking when needed.
    async fn search(&self, attrs: &HashMap<&str, &str>) -> Result<Vec<OwnedObjectPath>> {
        let service = self.proxy(SERVICE_PATH, SERVICE_IFACE).await?;
        let (mut unlocked, locked): (Vec<OwnedObjectPath>, Vec<OwnedObjectPath>) = service
            .call("SearchItems", &(attrs,))
            .await
            .map_err(|e| store_err("SearchItems", e))?;

        if !locked.is_empty() {
            debug!(count = locked.len(), "secret service items locked, requesting unlock");
            let (now_unlocked, prompt): (Vec<OwnedObjectPath>, OwnedObjectPath) = service
                .call("Unlock", &(&locked,))
                .await
                .map_err(|e| store_err("Unlock", e))?;
            unlocked.extend(now_unlocked);
            if prompt.as_str() != "/" {
                self.run_prompt(&prompt).await?;
                unlocked.extend(locked);
            }
        }
        Ok(unlocked)
    }

    /// Drive a Secret Service prompt and wait for its `Completed` signal.
    async fn run_prompt(&self, prompt_path: &OwnedObjectPath) -> Result<()> {
        let conn = self.conn().await?;
        let rule = zbus::MatchRule::builder()
            .msg_type(zbus::message::Type::Signal)
            .interface(PROMPT_IFACE)
            .and_then(|b| b.member("Completed"))
            .and_then(|b| b.path(prompt_path.as_str().to_string()))
            .map_err(|e| store_err("match rule", e))?
            .build();
        let mut stream = zbus::MessageStream::for_match_rule(rule, conn, None)
            .await
            .map_err(|e| store_err("subscribe Completed", e))?;

        let prompt = self.proxy(prompt_path.as_str(), PROMPT_IFACE).await?;
        prompt
            .call::<_, _, ()>("Prompt", &("",))
            .await
            .map_err(|e| store_err("Prompt", e))?;

        let msg = stream
            .try_next()
            .await
            .map_err(|e| store_err("await Completed", e))?
            .ok_or_else(|| Error::Store("prompt signal stream ended".to_string()))?;
        let (dismissed, _result): (bool, OwnedValue) = msg
            .body()
            .deserialize()
            .map_err(|e| store_err("Completed body", e))?;

        if dismissed {
            return Err(Error::VerificationFailed(
                "secret service unlock prompt dismissed".to_string(),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl CredentialStore for SecretServiceStore {
    fn kind(&self) -> &'static str {
        "secret-service"
    }

    async fn is_available(&self) -> bool {
        let Ok(conn) = self.conn().await else {
            return false;
        };
        let dbus = match zbus::Proxy::new(
            conn,
            "org.freedesktop.DBus",
            "/org/freedesktop/DBus",
            "org.freedesktop.DBus",
        )
        .await
        {
            Ok(p) => p,
            Err(_) => return false,
        };

        if let Ok(true) = dbus.call::<_, _, bool>("NameHasOwner", &(DEST,)).await {
            return true;
        }
        // Not running yet, but the bus can start it on demand.
        dbus.call::<_, _, Vec<String>>("ListActivatableNames", &())
            .await
            .map(|names| names.iter().any(|n| n == DEST))
            .unwrap_or(false)
    }

    async fn set(&self, namespace: &str, account: &str, label: &str, secret: &str) -> Result<()> {
        let session = self.open_session().await?;

        let attrs: HashMap<&str, &str> =
            HashMap::from([("service", namespace), ("account", account)]);
        let mut properties: HashMap<&str, Value<'_>> = HashMap::new();
        properties.insert("org.freedesktop.Secret.Item.Label", Value::from(label));
        properties.insert(
            "org.freedesktop.Secret.Item.Attributes",
            Value::from(attrs),
        );
        let value: SecretStruct = (
            session.clone(),
            Vec::new(),
            secret.as_bytes().to_vec(),
            "text/plain".to_string(),
        );

        let collection = self.proxy(DEFAULT_COLLECTION, COLLECTION_IFACE).await?;
        let result: zbus::Result<(OwnedObjectPath, OwnedObjectPath)> = collection
            .call("CreateItem", &(properties, value, true))
            .await;

        let outcome = match result {
            Ok((_, prompt)) if prompt.as_str() != "/" => self.run_prompt(&prompt).await,
            Ok(_) => Ok(()),
            Err(e) => Err(store_err("CreateItem", e)),
        };
        self.close_session(&session).await;
        outcome?;

        debug!(namespace, account, "secret stored");
        Ok(())
    }

    async fn get(&self, namespace: &str, account: &str) -> Result<Option<Zeroizing<String>>> {
        let attrs = HashMap::from([("service", namespace), ("account", account)]);
        let items = self.search(&attrs).await?;
        let Some(item) = items.into_iter().next() else {
            return Ok(None);
        };

        let session = self.open_session().await?;
        let service = self.proxy(SERVICE_PATH, SERVICE_IFACE).await?;
        let result: zbus::Result<HashMap<OwnedObjectPath, SecretStruct>> = service
            .call("GetSecrets", &(vec![item.clone()], &session))
            .await;
        self.close_session(&session).await;

        let mut secrets = result.map_err(|e| store_err("GetSecrets", e))?;
        let Some((_, _, bytes, _)) = secrets.remove(&item) else {
            return Ok(None);
        };
        let bytes = Zeroizing::new(bytes);
        let text = std::str::from_utf8(&bytes)
            .map_err(|e| Error::Store(format!("stored secret is not UTF-8: {e}")))?;
        Ok(Some(Zeroizing::new(text.to_string())))
    }

    async fn delete(&self, namespace: &str, account: &str) -> Result<bool> {
        let attrs = HashMap::from([("service", namespace), ("account", account)]);
        let items = self.search(&attrs).await?;
        if items.is_empty() {
            return Ok(false);
        }

        for item in &items {
            let proxy = self.proxy(item.as_str(), ITEM_IFACE).await?;
            let prompt: OwnedObjectPath = proxy
                .call("Delete", &())
                .await
                .map_err(|e| store_err("Item.Delete", e))?;
            if prompt.as_str() != "/" {
                self.run_prompt(&prompt).await?;
            }
        }
        debug!(namespace, account, removed = items.len(), "secret deleted");
        Ok(true)
    }

    async fn list(&self, namespace: &str) -> Result<Vec<String>> {
        let service = self.proxy(SERVICE_PATH, SERVICE_IFACE).await?;
        let attrs = HashMap::from([("service", namespace)]);
        let (unlocked, locked): (Vec<OwnedObjectPath>, Vec<OwnedObjectPath>) = service
            .call("SearchItems", &(&attrs,))
            .await
            .map_err(|e| store_err("SearchItems", e))?;

        let mut accounts = Vec::new();
        for item in unlocked.iter().chain(locked.iter()) {
            let proxy = self.proxy(item.as_str(), ITEM_IFACE).await?;
            let item_attrs: HashMap<String, String> = proxy
                .get_property("Attributes")
                .await
                .map_err(|e| store_err("Item.Attributes", e))?;
            if let Some(account) = item_attrs.get("account") {
                accounts.push(account.clone());
            }
        }
        accounts.sort();
        accounts.dedup();
        Ok(accounts)
    }
}
