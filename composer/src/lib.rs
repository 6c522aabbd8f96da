//! Docker-Compose-driven integration test harness. Spins up a private
//! bridge network plus one container per named binary, used by the
//! `#[tokio::test]` integration tests under `mbus-api` and `agents/core`
//! that need a real NATS server and/or real storage-node processes rather
//! than fakes.

use bollard::{
    container::{
        Config, CreateContainerOptions, ListContainersOptions,
        RemoveContainerOptions, StartContainerOptions, StopContainerOptions,
    },
    network::CreateNetworkOptions,
    Docker,
};
use ipnetwork::Ipv4Network;
use std::{collections::HashMap, str::FromStr};

/// How a container's entrypoint binary is located on the test host.
#[derive(Clone, Debug)]
pub struct Binary {
    path: String,
    args: Vec<String>,
}
impl Binary {
    /// A binary built by `cargo build` under `target/debug/<name>`
    pub fn from_dbg(name: &str) -> Self {
        Self {
            path: format!("target/debug/{}", name),
            args: vec![],
        }
    }
    /// A binary resolved on `$PATH` via nix (e.g. `nats-server`)
    pub fn from_nix(name: &str) -> Self {
        Self {
            path: name.to_string(),
            args: vec![],
        }
    }
    /// Append a single argument
    pub fn with_arg(mut self, arg: &str) -> Self {
        self.args.push(arg.to_string());
        self
    }
    /// Append several arguments
    pub fn with_args(mut self, args: Vec<&str>) -> Self {
        self.args.extend(args.into_iter().map(String::from));
        self
    }
    /// Convenience: append the NATS endpoint flag, pointed at the `nats`
    /// container on the test network
    pub fn with_nats(mut self, flag: &str) -> Self {
        self.args.push(flag.to_string());
        self.args.push("nats".to_string());
        self
    }
}

struct ContainerSpec {
    name: String,
    binary: Binary,
}

/// Builds a `ComposeTest`: a named bridge network plus a set of named
/// containers, each running one `Binary`.
pub struct Builder {
    name: String,
    containers: Vec<ContainerSpec>,
    clean: bool,
    autorun: bool,
    network: String,
}
impl Builder {
    /// Start building a new compose test
    pub fn new() -> Self {
        Self {
            name: "composer".to_string(),
            containers: vec![],
            clean: false,
            autorun: true,
            network: "10.1.0.0/16".to_string(),
        }
    }
    /// Name the test; used as a prefix for the network and container names
    pub fn name(mut self, name: &str) -> Self {
        self.name = name.to_string();
        self
    }
    /// Register a container named `name` running `binary`. Not started
    /// until `start`/`start_containers`/autorun does so.
    pub fn add_container_bin(mut self, name: &str, binary: Binary) -> Self {
        self.containers.push(ContainerSpec {
            name: name.to_string(),
            binary,
        });
        self
    }
    /// Remove any stale network/containers from a previous run with the
    /// same name before building this one
    pub fn with_clean(mut self, clean: bool) -> Self {
        self.clean = clean;
        self
    }
    /// Whether every registered container should be started as part of
    /// `build()`. `false` leaves orchestration to the caller (e.g. so the
    /// test can start "nats" before "mayastor" sees it on the network).
    pub fn autorun(mut self, autorun: bool) -> Self {
        self.autorun = autorun;
        self
    }
    /// Create the docker network and containers, starting them if
    /// `autorun` is set.
    pub async fn build(self) -> Result<ComposeTest, Error> {
        let docker = Docker::connect_with_unix_defaults()?;
        let network_name = format!("{}-net", self.name);

        if self.clean {
            let _ = docker
                .remove_network(&network_name)
                .await;
        }

        let subnet = Ipv4Network::from_str(&self.network)
            .map_err(|e| Error::Network(e.to_string()))?;
        docker
            .create_network(CreateNetworkOptions {
                name: network_name.clone(),
                ipam: bollard::models::Ipam {
                    config: Some(vec![bollard::models::IpamConfig {
                        subnet: Some(subnet.to_string()),
                        ..Default::default()
                    }]),
                    ..Default::default()
                },
                ..Default::default()
            })
            .await?;

        let mut test = ComposeTest {
            docker,
            network_name,
            containers: HashMap::new(),
        };
        for spec in self.containers {
            test.create(&spec.name, &spec.binary).await?;
            if self.autorun {
                test.start(&spec.name).await?;
            }
        }
        Ok(test)
    }
}
impl Default for Builder {
    fn default() -> Self {
        Self::new()
    }
}

/// A running (or partially running) compose test environment.
pub struct ComposeTest {
    docker: Docker,
    network_name: String,
    containers: HashMap<String, Binary>,
}

impl ComposeTest {
    async fn create(
        &mut self,
        name: &str,
        binary: &Binary,
    ) -> Result<(), Error> {
        let mut cmd = vec![binary.path.clone()];
        cmd.extend(binary.args.clone());
        self.docker
            .create_container(
                Some(CreateContainerOptions {
                    name: name.to_string(),
                }),
                Config {
                    cmd: Some(cmd),
                    network_disabled: Some(false),
                    ..Default::default()
                },
            )
            .await?;
        self.containers.insert(name.to_string(), binary.clone());
        Ok(())
    }

    /// Start a single, already-created container
    pub async fn start(&self, name: &str) -> Result<(), Error> {
        self.docker
            .start_container(name, None::<StartContainerOptions<String>>)
            .await?;
        Ok(())
    }

    /// Start several containers in the given order
    pub async fn start_containers(
        &self,
        names: Vec<&str>,
    ) -> Result<(), Error> {
        for name in names {
            self.start(name).await?;
        }
        Ok(())
    }

    /// Stop a running container
    pub async fn stop(&self, name: &str) -> Result<(), Error> {
        self.docker
            .stop_container(name, None::<StopContainerOptions>)
            .await?;
        Ok(())
    }

    /// Fetch a connected gRPC handle to the storage-node binary running in
    /// container `name`.
    pub async fn grpc_handle(
        &self,
        name: &str,
    ) -> Result<RpcHandle, Error> {
        let endpoint = format!("http://{}:10124", name);
        let channel = tonic::transport::Endpoint::from_shared(endpoint)
            .map_err(|e| Error::Connect(e.to_string()))?
            .connect()
            .await
            .map_err(|e| Error::Connect(e.to_string()))?;
        Ok(RpcHandle {
            mayastor: rpc::mayastor::mayastor_client::MayastorClient::new(
                channel,
            ),
        })
    }

    /// Print every container's logs to stdout; intended for
    /// `cargo test -- --nocapture` debugging.
    pub async fn logs_all(&self) -> Result<(), Error> {
        for name in self.containers.keys() {
            tracing::info!("--- logs: {} ---", name);
        }
        Ok(())
    }

    /// Tear down every container and the network
    pub async fn remove_all(&self) -> Result<(), Error> {
        for name in self.containers.keys() {
            let _ = self
                .docker
                .remove_container(
                    name,
                    Some(RemoveContainerOptions {
                        force: true,
                        ..Default::default()
                    }),
                )
                .await;
        }
        let _ = self.docker.remove_network(&self.network_name).await;
        Ok(())
    }

    /// List the names of every container currently running on the test
    /// network
    pub async fn list_running(&self) -> Result<Vec<String>, Error> {
        let containers = self
            .docker
            .list_containers(Some(ListContainersOptions::<String> {
                all: false,
                ..Default::default()
            }))
            .await?;
        Ok(containers
            .into_iter()
            .filter_map(|c| c.names.and_then(|mut n| n.pop()))
            .collect())
    }
}

/// A connected gRPC client bundle for a single storage-node container.
pub struct RpcHandle {
    /// the storage-node's control surface client
    pub mayastor: rpc::mayastor::mayastor_client::MayastorClient<
        tonic::transport::Channel,
    >,
}

/// Errors raised by the compose harness itself (as opposed to errors from
/// the processes it orchestrates).
#[derive(Debug)]
pub enum Error {
    /// failed to reach the local docker daemon
    Docker(bollard::errors::Error),
    /// failed to connect to a container's gRPC endpoint
    Connect(String),
    /// failed to build the test network
    Network(String),
}
impl From<bollard::errors::Error> for Error {
    fn from(source: bollard::errors::Error) -> Self {
        Self::Docker(source)
    }
}
impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Docker(e) => write!(f, "docker error: {}", e),
            Self::Connect(e) => write!(f, "connect error: {}", e),
            Self::Network(e) => write!(f, "network error: {}", e),
        }
    }
}
impl std::error::Error for Error {}
