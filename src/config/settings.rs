use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::broker::{self, Credentials, ProviderProperties};
use crate::utils::error::{Error, Result};

pub const DEFAULT_INITIAL_CONTEXT_FACTORY: &str = "memory";
pub const DEFAULT_PROVIDER_URL: &str = "memory://localhost";
pub const DEFAULT_CONNECTION_FACTORY_NAME: &str = "ConnectionFactory";
pub const DEFAULT_LOG_LEVEL: &str = "info";

const INITIAL_CONTEXT_FACTORY: &str = "initialContextFactory";
const PROVIDER_URL: &str = "providerUrl";
const CONNECTION_FACTORY_NAME: &str = "connectionFactoryName";
const USERNAME: &str = "username";
const PASSWORD: &str = "password";
const CONFIG_FILE_PATH: &str = "configFilePath";

const MB_ICF_ALIASES: [&str; 2] = ["wso2mbInitialContextFactory", "bmbInitialContextFactory"];
const MB_ICF_NAME: &str = "org.wso2.andes.jndi.PropertiesFileInitialContextFactory";
const MB_CF_NAME_PREFIX: &str = "connectionfactory.";

/// Logical configuration keys and the provider native names they are handed over as.
pub const KEY_MAPPING: [(&str, &str); 8] = [
    (INITIAL_CONTEXT_FACTORY, broker::INITIAL_CONTEXT_FACTORY),
    (PROVIDER_URL, broker::PROVIDER_URL),
    (CONNECTION_FACTORY_NAME, broker::CONNECTION_FACTORY_NAME),
    ("destinationType", broker::CONNECTION_FACTORY_TYPE),
    ("destination", broker::DESTINATION_NAME),
    ("acknowledgementMode", broker::SESSION_ACKNOWLEDGEMENT),
    ("clientId", broker::DURABLE_SUBSCRIBER_CLIENT_ID),
    ("subscriptionId", broker::DURABLE_SUBSCRIBER_NAME),
];

/// Maps a logical key to its native property name, if it has one.
pub fn native_key(logical: &str) -> Option<&'static str> {
    KEY_MAPPING
        .iter()
        .find(|(key, _)| *key == logical)
        .map(|(_, native)| *native)
}

/// Top-level configuration settings for the application.
///
/// Holds the broker connection and the logging setup.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct Settings {
    pub connection: ConnectionConfig,
    pub logging: LoggingSettings,
}

/// How to reach a broker.
///
/// `properties` is the provider specific property bag. It is merged over
/// the named fields when the native property set is built, so an entry there
/// wins over a conflicting field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionConfig {
    pub initial_context_factory: String,
    #[serde(default)]
    pub provider_url: String,
    #[serde(default)]
    pub connection_factory_name: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub properties: BTreeMap<String, String>,
}

/// Configuration settings for logging.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct LoggingSettings {
    pub level: String,
}

/// Partial configuration settings loaded from files or environment.
///
/// Allows partial specification of settings. Missing values can be filled using defaults.
#[derive(Debug, Deserialize)]
pub struct PartialSettings {
    pub connection: Option<PartialConnectionConfig>,
    pub logging: Option<PartialLoggingSettings>,
}

/// Partial connection settings.
#[derive(Debug, Deserialize)]
pub struct PartialConnectionConfig {
    pub initial_context_factory: Option<String>,
    pub provider_url: Option<String>,
    pub connection_factory_name: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub properties: Option<BTreeMap<String, String>>,
}

#[derive(Debug, Deserialize)]
pub struct PartialLoggingSettings {
    pub level: Option<String>,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            initial_context_factory: DEFAULT_INITIAL_CONTEXT_FACTORY.to_string(),
            provider_url: DEFAULT_PROVIDER_URL.to_string(),
            connection_factory_name: DEFAULT_CONNECTION_FACTORY_NAME.to_string(),
            username: None,
            password: None,
            properties: BTreeMap::new(),
        }
    }
}

/// Provides default values for `Settings`.
///
/// Connects to the bundled in-memory broker and logs at `info`.
impl Default for Settings {
    fn default() -> Self {
        Self {
            connection: ConnectionConfig::default(),
            logging: LoggingSettings {
                level: DEFAULT_LOG_LEVEL.to_string(),
            },
        }
    }
}

impl ConnectionConfig {
    /// Builds a connection configuration from a logical key/value map.
    ///
    /// `initialContextFactory`, `providerUrl`, `connectionFactoryName`,
    /// `username` and `password` fill the named fields; every other key lands
    /// in the property bag untouched.
    pub fn from_map<K, V>(map: impl IntoIterator<Item = (K, V)>) -> Result<Self>
    where
        K: Into<String>,
        V: Into<String>,
    {
        let mut config = ConnectionConfig {
            initial_context_factory: String::new(),
            provider_url: String::new(),
            connection_factory_name: String::new(),
            username: None,
            password: None,
            properties: BTreeMap::new(),
        };
        for (key, value) in map {
            let key = key.into();
            let value = value.into();
            match key.as_str() {
                INITIAL_CONTEXT_FACTORY => config.initial_context_factory = value,
                PROVIDER_URL => config.provider_url = value,
                CONNECTION_FACTORY_NAME => config.connection_factory_name = value,
                USERNAME => config.username = Some(value),
                PASSWORD => config.password = Some(value),
                _ => {
                    config.properties.insert(key, value);
                }
            }
        }
        config.validate()?;
        Ok(config)
    }

    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    pub fn with_credentials(mut self, username: &str, password: &str) -> Self {
        self.username = Some(username.to_string());
        self.password = Some(password.to_string());
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.initial_context_factory.trim().is_empty() {
            return Err(Error::config(
                "initialContextFactory property should be set",
            ));
        }
        match (&self.username, &self.password) {
            (Some(_), None) | (None, Some(_)) => Err(Error::config(
                "username and password must be provided together",
            )),
            _ => Ok(()),
        }
    }

    /// Credentials to authenticate with. A blank username connects anonymously.
    pub fn credentials(&self) -> Option<Credentials> {
        match (&self.username, &self.password) {
            (Some(username), Some(password)) if !username.trim().is_empty() => Some(Credentials {
                username: username.clone(),
                password: password.clone(),
            }),
            _ => None,
        }
    }

    /// Resolves the provider name and the native property set handed to it.
    ///
    /// The property bag is merged last, then message-broker aliases are
    /// expanded, then every logical key in [`KEY_MAPPING`] is renamed to its
    /// native name.
    pub fn native_properties(&self) -> Result<(String, ProviderProperties)> {
        self.validate()?;

        let mut logical: BTreeMap<String, String> = BTreeMap::new();
        logical.insert(
            INITIAL_CONTEXT_FACTORY.to_string(),
            self.initial_context_factory.clone(),
        );
        if !self.provider_url.is_empty() {
            logical.insert(PROVIDER_URL.to_string(), self.provider_url.clone());
        }
        if !self.connection_factory_name.is_empty() {
            logical.insert(
                CONNECTION_FACTORY_NAME.to_string(),
                self.connection_factory_name.clone(),
            );
        }
        logical.extend(self.properties.clone());

        expand_broker_alias(&mut logical)?;

        let mut native = ProviderProperties::new();
        for (key, value) in logical {
            match native_key(&key) {
                Some(mapped) => native.insert(mapped.to_string(), value),
                None => native.insert(key, value),
            };
        }

        let provider = native
            .get(broker::INITIAL_CONTEXT_FACTORY)
            .cloned()
            .unwrap_or_default();
        Ok((provider, native))
    }
}

fn expand_broker_alias(logical: &mut BTreeMap<String, String>) -> Result<()> {
    let is_alias = logical
        .get(INITIAL_CONTEXT_FACTORY)
        .is_some_and(|f| MB_ICF_ALIASES.iter().any(|a| a.eq_ignore_ascii_case(f)));
    if !is_alias {
        return Ok(());
    }

    logical.insert(INITIAL_CONTEXT_FACTORY.to_string(), MB_ICF_NAME.to_string());
    if let Some(url) = logical.remove(PROVIDER_URL) {
        let factory = logical
            .get(CONNECTION_FACTORY_NAME)
            .map(|name| name.trim().to_string())
            .filter(|name| !name.is_empty())
            .ok_or_else(|| Error::config("connectionFactoryName property should be set"))?;
        logical.insert(format!("{MB_CF_NAME_PREFIX}{factory}"), url);
    } else if let Some(path) = logical.remove(CONFIG_FILE_PATH) {
        logical.insert(PROVIDER_URL.to_string(), path);
    }
    Ok(())
}
