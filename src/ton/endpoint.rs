use std::net::Ipv4Addr;

use log::{info, warn};
use serde::{Deserialize, Serialize};

use crate::config::ClientConfig;
use crate::error::{ClientError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Network {
    Mainnet,
    Testnet,
}

impl Network {
    pub fn is_testnet(&self) -> bool {
        matches!(self, Network::Testnet)
    }
}

/// How the client picks light servers for a call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Selection {
    /// Rotate through every server in index order.
    Auto,
    /// Always use the server at this index.
    Fixed(usize),
}

/// One light server from the directory. Immutable once fetched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endpoint {
    pub index: usize,
    pub network: Network,
    pub url: String,
}

/// Directory entries come in two shapes: gateway entries carrying a URL, and
/// classic config entries carrying a packed IPv4 + port.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum DirectoryEntry {
    Url { url: String },
    IpPort { ip: i64, port: u16 },
}

impl DirectoryEntry {
    fn into_url(self) -> String {
        match self {
            DirectoryEntry::Url { url } => url,
            DirectoryEntry::IpPort { ip, port } => {
                let addr = Ipv4Addr::from(ip as u32);
                format!("http://{}:{}", addr, port)
            }
        }
    }
}

#[derive(Debug, Deserialize)]
struct Directory {
    liteservers: Vec<DirectoryEntry>,
}

/// The fixed, ordered list of light servers for one network.
///
/// Fetched once at client construction; never mutated afterwards. Rotation
/// state lives in per-call cursors, not here.
#[derive(Debug, Clone)]
pub struct EndpointPool {
    network: Network,
    selection: Selection,
    endpoints: Vec<Endpoint>,
}

impl EndpointPool {
    /// Downloads the light-server directory, retrying up to
    /// `config.config_retry_cnt` times with immediate re-requests.
    pub async fn fetch(config: &ClientConfig) -> Result<Self> {
        let url = config.directory_url();
        let http = reqwest::Client::new();
        let mut last_error = String::new();

        for attempt in 1..=config.config_retry_cnt {
            info!(
                "fetching light server directory from {} ({}/{})",
                url, attempt, config.config_retry_cnt
            );
            match http.get(&url).send().await {
                Ok(response) if response.status().is_success() => {
                    match response.json::<Directory>().await {
                        Ok(directory) => {
                            return Self::from_urls(
                                config.network,
                                directory
                                    .liteservers
                                    .into_iter()
                                    .map(DirectoryEntry::into_url)
                                    .collect(),
                                config.ls_index,
                            );
                        }
                        Err(e) => {
                            warn!("malformed light server directory from {}: {}", url, e);
                            last_error = e.to_string();
                        }
                    }
                }
                Ok(response) => {
                    warn!(
                        "light server directory request to {} returned {}",
                        url,
                        response.status()
                    );
                    last_error = format!("status {}", response.status());
                }
                Err(e) => {
                    warn!("light server directory request to {} failed: {}", url, e);
                    last_error = e.to_string();
                }
            }
        }

        Err(ClientError::DirectoryUnavailable {
            attempts: config.config_retry_cnt,
            reason: last_error,
        })
    }

    /// Builds a pool from known gateway URLs. The list must be non-empty and
    /// a pinned index must be in range.
    pub fn from_urls(network: Network, urls: Vec<String>, selection: Selection) -> Result<Self> {
        if urls.is_empty() {
            return Err(ClientError::DirectoryUnavailable {
                attempts: 0,
                reason: "directory contained no light servers".to_string(),
            });
        }
        if let Selection::Fixed(index) = selection {
            if index >= urls.len() {
                return Err(ClientError::Config(format!(
                    "pinned light server index {} out of range for {} servers",
                    index,
                    urls.len()
                )));
            }
        }
        let endpoints = urls
            .into_iter()
            .enumerate()
            .map(|(index, url)| Endpoint {
                index,
                network,
                url,
            })
            .collect();
        Ok(Self {
            network,
            selection,
            endpoints,
        })
    }

    pub fn network(&self) -> Network {
        self.network
    }

    pub fn selection(&self) -> Selection {
        self.selection
    }

    pub fn len(&self) -> usize {
        self.endpoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.endpoints.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Endpoint> {
        self.endpoints.get(index)
    }

    /// The endpoints one full sweep visits, in order: every server for
    /// [`Selection::Auto`], only the pinned one for [`Selection::Fixed`].
    pub fn sweep(&self) -> impl Iterator<Item = &Endpoint> + '_ {
        let range = match self.selection {
            Selection::Auto => 0..self.endpoints.len(),
            Selection::Fixed(index) => index..index + 1,
        };
        range.filter_map(move |i| self.endpoints.get(i))
    }
}
