use std::collections::BTreeMap;
use std::fmt;
use std::net::IpAddr;
use std::path::PathBuf;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::environment::{Environment, env_key};
use crate::error::{Error, Result};

/// The closed set of container kinds.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContainerKind {
    /// Serves HTTP to end users.
    Web,

    /// Application logic behind the web tier.
    Business,

    /// Databases and other stateful stores.
    Data,
}

impl ContainerKind {
    /// Every kind, in namespace creation order.
    pub const ALL: [Self; 3] = [Self::Web, Self::Business, Self::Data];

    /// The name used for the kind's node in the store.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Web => "web",
            Self::Business => "business",
            Self::Data => "data",
        }
    }

    /// What brokers can do with descriptors of this kind.
    #[must_use]
    pub const fn capabilities(self) -> Capabilities {
        match self {
            Self::Web => Capabilities {
                deserialize: deserialize_web,
                update_ip: update_web_ip,
                conf_suffix: "web.json",
            },
            Self::Business => Capabilities {
                deserialize: deserialize_business,
                update_ip: update_plain_ip,
                conf_suffix: "business.json",
            },
            Self::Data => Capabilities {
                deserialize: deserialize_data,
                update_ip: update_plain_ip,
                conf_suffix: "data.json",
            },
        }
    }
}

impl fmt::Display for ContainerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-kind operations on descriptors.
#[derive(Clone, Copy, Debug)]
pub struct Capabilities {
    /// Decodes a descriptor, rejecting descriptors of other kinds.
    pub deserialize: fn(&[u8]) -> Result<ContainerDescriptor>,

    /// Records the address the container was given.
    pub update_ip: fn(&mut ContainerDescriptor, IpAddr),

    /// Suffix of the local configuration copy.
    pub conf_suffix: &'static str,
}

impl Capabilities {
    /// File name of the local configuration copy of `descriptor`.
    #[must_use]
    pub fn conf_file_name(&self, descriptor: &ContainerDescriptor) -> String {
        format!("{}.{}", descriptor.name, self.conf_suffix)
    }
}

fn deserialize_as(kind: ContainerKind, bytes: &[u8]) -> Result<ContainerDescriptor> {
    let descriptor: ContainerDescriptor = serde_json::from_slice(bytes)?;
    if descriptor.kind() == kind {
        Ok(descriptor)
    } else {
        Err(Error::KindMismatch {
            expected: kind,
            found: descriptor.kind(),
        })
    }
}

fn deserialize_web(bytes: &[u8]) -> Result<ContainerDescriptor> {
    deserialize_as(ContainerKind::Web, bytes)
}

fn deserialize_business(bytes: &[u8]) -> Result<ContainerDescriptor> {
    deserialize_as(ContainerKind::Business, bytes)
}

fn deserialize_data(bytes: &[u8]) -> Result<ContainerDescriptor> {
    let descriptor = deserialize_as(ContainerKind::Data, bytes)?;
    if matches!(&descriptor.settings, KindSettings::Data { database, .. } if database.is_empty()) {
        return Err(Error::InvalidField {
            container: descriptor.name,
            field: "database",
        });
    }
    Ok(descriptor)
}

fn update_plain_ip(descriptor: &mut ContainerDescriptor, ip: IpAddr) {
    descriptor.ip = Some(ip);
}

fn update_web_ip(descriptor: &mut ContainerDescriptor, ip: IpAddr) {
    descriptor.ip = Some(ip);

    let port = descriptor.start.port;
    if let KindSettings::Web {
        context_path,
        public_url,
    } = &mut descriptor.settings
    {
        let host = match ip {
            IpAddr::V4(v4) => v4.to_string(),
            IpAddr::V6(v6) => format!("[{v6}]"),
        };
        *public_url = Some(match port {
            Some(port) => format!("http://{host}:{port}{context_path}"),
            None => format!("http://{host}{context_path}"),
        });
    }
}

/// How a supervised process signals it is ready.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ReadinessSpec {
    /// Ready once the declared port accepts loopback connections.
    #[default]
    Socket,

    /// Ready once standard output carries the control token followed by the
    /// PID of the delegate process.
    OutputToken {
        /// Overrides the default token.
        #[serde(default)]
        token: Option<String>,
    },

    /// Ready as soon as it runs.
    Immediate,
}

/// A process a container runs.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessSpec {
    /// Program followed by its arguments.
    pub command: Vec<String>,

    /// Port the process listens on.
    #[serde(default)]
    pub port: Option<u16>,

    /// How readiness is detected.
    #[serde(default)]
    pub readiness: ReadinessSpec,

    /// Working directory.
    #[serde(default)]
    pub working_dir: Option<PathBuf>,
}

fn default_context_path() -> String {
    "/".to_string()
}

/// Settings specific to the container kind.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum KindSettings {
    /// Web tier.
    Web {
        /// Path the application is mounted at.
        #[serde(default = "default_context_path")]
        context_path: String,

        /// Externally reachable URL, known once the container has an address.
        #[serde(default)]
        public_url: Option<String>,
    },

    /// Business tier.
    Business {
        /// Size of the worker pool.
        #[serde(default)]
        workers: Option<u32>,
    },

    /// Data tier.
    Data {
        /// Database name.
        database: String,

        /// Database user.
        #[serde(default)]
        user: Option<String>,

        /// Database password.
        #[serde(default)]
        password: Option<String>,
    },
}

impl KindSettings {
    /// The kind these settings belong to.
    #[must_use]
    pub const fn kind(&self) -> ContainerKind {
        match self {
            Self::Web { .. } => ContainerKind::Web,
            Self::Business { .. } => ContainerKind::Business,
            Self::Data { .. } => ContainerKind::Data,
        }
    }

    fn extend_environment(&self, environment: &mut Environment) {
        let mut put = |key: &str, value: String| {
            environment.insert(key.to_string(), value);
        };

        match self {
            Self::Web {
                context_path,
                public_url,
            } => {
                put("CONTEXT_PATH", context_path.clone());
                if let Some(url) = public_url {
                    put("PUBLIC_URL", url.clone());
                }
            }
            Self::Business { workers } => {
                if let Some(workers) = workers {
                    put("WORKERS", workers.to_string());
                }
            }
            Self::Data {
                database,
                user,
                password,
            } => {
                put("DB_NAME", database.clone());
                if let Some(user) = user {
                    put("DB_USER", user.clone());
                }
                if let Some(password) = password {
                    put("DB_PASSWORD", password.clone());
                }
            }
        }
    }
}

/// Everything a broker needs to know about one container.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerDescriptor {
    /// Unique name, also the name of the service the container offers.
    pub name: String,

    /// Image the container is launched from.
    pub image: String,

    /// Declared environment.
    #[serde(default)]
    pub environment: BTreeMap<String, String>,

    /// The main process.
    pub start: ProcessSpec,

    /// Run to stop the main process gracefully.
    #[serde(default)]
    pub stop: Option<ProcessSpec>,

    /// Names of the containers this one waits for.
    #[serde(default)]
    pub dependencies: Vec<String>,

    /// Kind-specific settings.
    pub settings: KindSettings,

    /// Address of the running container.
    #[serde(default)]
    pub ip: Option<IpAddr>,
}

impl ContainerDescriptor {
    /// The container kind.
    #[must_use]
    pub const fn kind(&self) -> ContainerKind {
        self.settings.kind()
    }

    /// The capability table for this descriptor's kind.
    #[must_use]
    pub const fn capabilities(&self) -> Capabilities {
        self.kind().capabilities()
    }

    /// The flat environment this container exposes, with upper-cased keys.
    ///
    /// Contains the declared environment plus `NAME`, `KIND`, `PORT` and `IP`
    /// when known, and the kind settings. Derived entries override declared
    /// ones.
    #[must_use]
    pub fn environment(&self) -> Environment {
        let mut environment: Environment = self
            .environment
            .iter()
            .map(|(key, value)| (env_key(key), value.clone()))
            .collect();

        environment.insert("NAME".to_string(), self.name.clone());
        environment.insert("KIND".to_string(), self.kind().as_str().to_string());
        if let Some(port) = self.start.port {
            environment.insert("PORT".to_string(), port.to_string());
        }
        if let Some(ip) = self.ip {
            environment.insert("IP".to_string(), ip.to_string());
        }
        self.settings.extend_environment(&mut environment);

        environment
    }

    /// Serializes the descriptor.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_bytes(&self) -> Result<Bytes> {
        Ok(Bytes::from(serde_json::to_vec(self)?))
    }
}

impl TryFrom<Bytes> for ContainerDescriptor {
    type Error = Error;

    fn try_from(bytes: Bytes) -> Result<Self> {
        Ok(serde_json::from_slice(&bytes)?)
    }
}

impl TryInto<Bytes> for ContainerDescriptor {
    type Error = Error;

    fn try_into(self) -> Result<Bytes> {
        self.to_bytes()
    }
}
