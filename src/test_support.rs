//! Test support utilities shared across unit and integration tests.
//!
//! [`FakeCloud`] is an in-memory implementation of every backend capability
//! that records calls and supports failure injection. [`FakeRemote`] stands
//! in for SSH, and [`ScriptedRunner`] for local processes.

use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::env;
use std::ffi::OsString;
use std::sync::{Arc, PoisonError};
use std::time::Duration;

use thiserror::Error;
use tokio::sync::{Mutex as AsyncMutex, MutexGuard as AsyncMutexGuard};

use crate::backend::{
    Backend, BackendFuture, ComputeBackend, CredentialBackend, IngressRule, InstanceState,
    InstanceStatus, KeyPair, LaunchRequest, NetworkAccessBackend, ShareBackend, SharePage,
    ShareVolume, SnapshotBackend, SnapshotRecord, TransientError,
};
use crate::command::{CommandError, CommandOutput, CommandRunner};
use crate::compute::{ComputeProvisioner, LaunchConfig};
use crate::config::{BackupConfig, ScalewayConfig};
use crate::copy::CopySettings;
use crate::credential::CredentialProvisioner;
use crate::keystore::KeyStore;
use crate::network::NetworkAccessProvisioner;
use crate::retry::RetryPolicy;
use crate::run::WorkflowSettings;
use crate::ssh::{RemoteConnector, RemoteError, RemoteSession, SessionTarget};
use crate::teardown::AcquiredResources;

type SharedMutex<T> = Arc<std::sync::Mutex<T>>;

fn lock<T>(mutex: &std::sync::Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Scripted command runner that returns pre-seeded outputs in FIFO order.
///
/// Used to drive deterministic command outcomes without spawning processes.
#[derive(Clone, Debug, Default)]
pub struct ScriptedRunner {
    responses: std::rc::Rc<std::cell::RefCell<VecDeque<CommandOutput>>>,
    invocations: std::rc::Rc<std::cell::RefCell<Vec<CommandInvocation>>>,
}

/// Records a single invocation made through [`ScriptedRunner`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CommandInvocation {
    /// Program name as passed to the runner.
    pub program: String,
    /// Arguments passed to the program.
    pub args: Vec<OsString>,
}

impl CommandInvocation {
    /// Returns a shell-like command string for assertions.
    #[must_use]
    pub fn command_string(&self) -> String {
        let mut parts = Vec::with_capacity(self.args.len() + 1);
        parts.push(self.program.clone());
        parts.extend(
            self.args
                .iter()
                .map(|arg| arg.to_string_lossy().into_owned()),
        );
        parts.join(" ")
    }
}

impl ScriptedRunner {
    /// Creates a new runner with no queued responses.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a snapshot of all invocations recorded so far.
    #[must_use]
    pub fn invocations(&self) -> Vec<CommandInvocation> {
        self.invocations.borrow().clone()
    }

    /// Pushes a successful exit status.
    pub fn push_success(&self) {
        self.push_output(Some(0), "", "");
    }

    /// Pushes a failing exit code with stderr text.
    pub fn push_failure(&self, code: i32) {
        self.push_output(Some(code), "", "simulated failure");
    }

    /// Pushes an explicit command output response.
    pub fn push_output(
        &self,
        code: Option<i32>,
        stdout: impl Into<String>,
        stderr: impl Into<String>,
    ) {
        self.responses.borrow_mut().push_back(CommandOutput {
            code,
            stdout: stdout.into(),
            stderr: stderr.into(),
        });
    }
}

impl CommandRunner for ScriptedRunner {
    fn run(&self, program: &str, args: &[OsString]) -> Result<CommandOutput, CommandError> {
        self.invocations.borrow_mut().push(CommandInvocation {
            program: program.to_owned(),
            args: args.to_vec(),
        });
        self.responses
            .borrow_mut()
            .pop_front()
            .ok_or_else(|| CommandError::Spawn {
                program: program.to_owned(),
                message: String::from("no scripted response available"),
            })
    }
}

/// Backend operations that can be counted and made to fail.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum Operation {
    /// [`ShareBackend::list_shares`].
    ListShares,
    /// [`CredentialBackend::delete_key_pair`].
    DeleteKeyPair,
    /// [`CredentialBackend::create_key_pair`].
    CreateKeyPair,
    /// [`NetworkAccessBackend::create_rule_set`].
    CreateRuleSet,
    /// [`NetworkAccessBackend::add_ingress_rule`].
    AddIngressRule,
    /// [`NetworkAccessBackend::delete_rule_set`].
    DeleteRuleSet,
    /// [`NetworkAccessBackend::find_rule_set`].
    FindRuleSet,
    /// [`ComputeBackend::launch`].
    Launch,
    /// [`ComputeBackend::describe_instance`].
    DescribeInstance,
    /// [`ComputeBackend::terminate`].
    Terminate,
    /// [`SnapshotBackend::create_snapshot`].
    CreateSnapshot,
}

/// Kind of injected failure.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum FaultKind {
    /// Reported as retryable.
    Transient,
    /// Reported as permanent.
    Fatal,
    /// The call takes effect but its response is lost, reported as a
    /// retryable timeout.
    LostResponse,
}

/// A call received by [`FakeCloud`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum CloudCall {
    /// Share listing page.
    ListShares {
        /// Page requested.
        page: u32,
        /// Page size requested.
        page_size: u32,
    },
    /// Key pair deletion by name.
    DeleteKeyPair(String),
    /// Key pair creation by name.
    CreateKeyPair(String),
    /// Rule-set creation by name.
    CreateRuleSet(String),
    /// Ingress rule addition.
    AddIngressRule {
        /// Target rule set.
        rule_set_id: String,
        /// Rule added.
        rule: IngressRule,
    },
    /// Rule-set deletion by name.
    DeleteRuleSet(String),
    /// Rule-set lookup by name.
    FindRuleSet(String),
    /// Instance launch by name.
    Launch(String),
    /// Instance description.
    DescribeInstance(String),
    /// Instance termination.
    Terminate(String),
    /// Snapshot request.
    CreateSnapshot {
        /// Volume snapshotted.
        volume_id: String,
        /// Description supplied.
        description: String,
    },
}

impl CloudCall {
    /// Operation this call belongs to.
    #[must_use]
    pub const fn operation(&self) -> Operation {
        match self {
            Self::ListShares { .. } => Operation::ListShares,
            Self::DeleteKeyPair(_) => Operation::DeleteKeyPair,
            Self::CreateKeyPair(_) => Operation::CreateKeyPair,
            Self::CreateRuleSet(_) => Operation::CreateRuleSet,
            Self::AddIngressRule { .. } => Operation::AddIngressRule,
            Self::DeleteRuleSet(_) => Operation::DeleteRuleSet,
            Self::FindRuleSet(_) => Operation::FindRuleSet,
            Self::Launch(_) => Operation::Launch,
            Self::DescribeInstance(_) => Operation::DescribeInstance,
            Self::Terminate(_) => Operation::Terminate,
            Self::CreateSnapshot { .. } => Operation::CreateSnapshot,
        }
    }
}

/// Error returned by [`FakeCloud`].
#[derive(Clone, Debug, Error, Eq, PartialEq)]
#[error("simulated {operation:?} failure: {message}")]
pub struct FakeCloudError {
    /// Operation that failed.
    pub operation: Operation,
    /// Whether the failure is retryable.
    pub transient: bool,
    /// Description of the failure.
    pub message: String,
}

impl TransientError for FakeCloudError {
    fn is_transient(&self) -> bool {
        self.transient
    }
}

#[derive(Clone, Debug)]
struct FakeInstance {
    state: InstanceState,
    pending_polls: u32,
    address: String,
    block_devices: Vec<String>,
}

#[derive(Debug, Default)]
struct CloudState {
    shares: Vec<ShareVolume>,
    calls: Vec<CloudCall>,
    faults: HashMap<Operation, VecDeque<FaultKind>>,
    key_pairs: BTreeMap<String, String>,
    rule_sets: BTreeMap<String, (String, Vec<IngressRule>)>,
    instances: BTreeMap<String, FakeInstance>,
    launch_requests: Vec<LaunchRequest>,
    snapshots: Vec<SnapshotRecord>,
    pending_polls: u32,
    next_id: u64,
}

impl CloudState {
    fn next_id(&mut self, prefix: &str) -> String {
        self.next_id += 1;
        format!("{prefix}-{}", self.next_id)
    }

    fn enter(&mut self, call: CloudCall) -> Option<FaultKind> {
        let operation = call.operation();
        self.calls.push(call);
        self.faults
            .get_mut(&operation)
            .and_then(VecDeque::pop_front)
    }
}

/// In-memory cloud implementing every backend capability.
#[derive(Clone, Debug, Default)]
pub struct FakeCloud {
    state: SharedMutex<CloudState>,
}

impl FakeCloud {
    /// Creates an empty cloud whose instances run on the first poll.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds the shares returned by the listing.
    #[must_use]
    pub fn with_shares(self, shares: Vec<ShareVolume>) -> Self {
        lock(&self.state).shares = shares;
        self
    }

    /// Makes new instances report pending for `polls` describe calls.
    #[must_use]
    pub fn with_pending_polls(self, polls: u32) -> Self {
        lock(&self.state).pending_polls = polls;
        self
    }

    /// Makes the next call to `operation` fail with `kind`. Repeated calls
    /// queue further failures.
    pub fn fail_next(&self, operation: Operation, kind: FaultKind) {
        lock(&self.state)
            .faults
            .entry(operation)
            .or_default()
            .push_back(kind);
    }

    /// Every call received so far.
    #[must_use]
    pub fn calls(&self) -> Vec<CloudCall> {
        lock(&self.state).calls.clone()
    }

    /// Forgets recorded calls.
    pub fn clear_calls(&self) {
        lock(&self.state).calls.clear();
    }

    /// Number of calls made to `operation`, including failed ones.
    #[must_use]
    pub fn count(&self, operation: Operation) -> usize {
        lock(&self.state)
            .calls
            .iter()
            .filter(|call| call.operation() == operation)
            .count()
    }

    /// Names of key pairs that currently exist.
    #[must_use]
    pub fn live_key_pairs(&self) -> Vec<String> {
        lock(&self.state).key_pairs.keys().cloned().collect()
    }

    /// Names of rule sets that currently exist.
    #[must_use]
    pub fn live_rule_sets(&self) -> Vec<String> {
        lock(&self.state).rule_sets.keys().cloned().collect()
    }

    /// Rules of the rule set with identifier `rule_set_id`.
    #[must_use]
    pub fn rules_for(&self, rule_set_id: &str) -> Vec<IngressRule> {
        lock(&self.state)
            .rule_sets
            .values()
            .find(|(id, _)| id == rule_set_id)
            .map(|(_, rules)| rules.clone())
            .unwrap_or_default()
    }

    /// Launch requests received, in order.
    #[must_use]
    pub fn launch_requests(&self) -> Vec<LaunchRequest> {
        lock(&self.state).launch_requests.clone()
    }

    /// Current state of `instance_id`, if it was ever launched.
    #[must_use]
    pub fn instance_state(&self, instance_id: &str) -> Option<InstanceState> {
        lock(&self.state)
            .instances
            .get(instance_id)
            .map(|instance| instance.state.clone())
    }

    /// Snapshots created, in order.
    #[must_use]
    pub fn snapshots(&self) -> Vec<SnapshotRecord> {
        lock(&self.state).snapshots.clone()
    }

    /// Provisions a key pair, a rule set and a running instance, returning
    /// them as acquired resources.
    ///
    /// # Panics
    ///
    /// Panics when any provisioning step fails.
    pub async fn acquire_all<K: KeyStore>(&self, key_store: &K) -> AcquiredResources {
        let policy = RetryPolicy::immediate(3);
        let credential = CredentialProvisioner::new(self, key_store, "fixture-key", policy)
            .provision()
            .await
            .unwrap_or_else(|err| panic!("credential: {err}"));
        let network = NetworkAccessProvisioner::new(self, "fixture", "token", 22, policy)
            .provision(0)
            .await
            .unwrap_or_else(|err| panic!("network: {err}"));
        let instance = ComputeProvisioner::new(self, RetryPolicy::immediate(10), policy)
            .launch(&LaunchConfig {
                name: String::from("fixture-instance"),
                image: String::from("image"),
                instance_type: String::from("DEV1-S"),
                volume_size_gb: 1,
                credential_name: credential.name.clone(),
                network_access_id: network.id.clone(),
            })
            .await
            .unwrap_or_else(|err| panic!("instance: {err}"));
        AcquiredResources {
            credential: Some(credential),
            network: Some(network),
            instance_id: Some(instance.id),
        }
    }

    fn with_state<T>(
        &self,
        call: CloudCall,
        apply: impl FnOnce(&mut CloudState) -> Result<T, FakeCloudError>,
    ) -> Result<T, FakeCloudError> {
        let operation = call.operation();
        let mut state = lock(&self.state);
        match state.enter(call) {
            None => apply(&mut state),
            Some(FaultKind::LostResponse) => {
                apply(&mut state)?;
                Err(FakeCloudError {
                    operation,
                    transient: true,
                    message: String::from("timed out waiting for response"),
                })
            }
            Some(kind) => Err(FakeCloudError {
                operation,
                transient: kind == FaultKind::Transient,
                message: String::from("injected"),
            }),
        }
    }
}

impl Backend for FakeCloud {
    type Error = FakeCloudError;
}

impl ShareBackend for FakeCloud {
    fn list_shares(&self, page: u32, page_size: u32) -> BackendFuture<'_, SharePage, Self::Error> {
        Box::pin(async move {
            self.with_state(CloudCall::ListShares { page, page_size }, |state| {
                let size = usize::try_from(page_size.max(1)).unwrap_or(usize::MAX);
                let index = usize::try_from(page.saturating_sub(1)).unwrap_or(usize::MAX);
                let start = index.saturating_mul(size);
                let shares: Vec<ShareVolume> =
                    state.shares.iter().skip(start).take(size).cloned().collect();
                let has_more = start.saturating_add(size) < state.shares.len();
                Ok(SharePage { shares, has_more })
            })
        })
    }
}

impl CredentialBackend for FakeCloud {
    fn delete_key_pair<'a>(&'a self, name: &'a str) -> BackendFuture<'a, (), Self::Error> {
        Box::pin(async move {
            self.with_state(CloudCall::DeleteKeyPair(name.to_owned()), |state| {
                state.key_pairs.remove(name);
                Ok(())
            })
        })
    }

    fn create_key_pair<'a>(&'a self, name: &'a str) -> BackendFuture<'a, KeyPair, Self::Error> {
        Box::pin(async move {
            self.with_state(CloudCall::CreateKeyPair(name.to_owned()), |state| {
                if state.key_pairs.contains_key(name) {
                    return Err(FakeCloudError {
                        operation: Operation::CreateKeyPair,
                        transient: false,
                        message: format!("key pair {name} already exists"),
                    });
                }
                let id = state.next_id("key");
                state.key_pairs.insert(name.to_owned(), id.clone());
                Ok(KeyPair {
                    private_key: format!("private key {id}").into_bytes(),
                    id,
                    name: name.to_owned(),
                })
            })
        })
    }
}

impl NetworkAccessBackend for FakeCloud {
    fn create_rule_set<'a>(&'a self, name: &'a str) -> BackendFuture<'a, String, Self::Error> {
        Box::pin(async move {
            self.with_state(CloudCall::CreateRuleSet(name.to_owned()), |state| {
                if state.rule_sets.contains_key(name) {
                    return Err(FakeCloudError {
                        operation: Operation::CreateRuleSet,
                        transient: false,
                        message: format!("rule set {name} already exists"),
                    });
                }
                let id = state.next_id("sg");
                state
                    .rule_sets
                    .insert(name.to_owned(), (id.clone(), Vec::new()));
                Ok(id)
            })
        })
    }

    fn add_ingress_rule<'a>(
        &'a self,
        rule_set_id: &'a str,
        rule: &'a IngressRule,
    ) -> BackendFuture<'a, (), Self::Error> {
        Box::pin(async move {
            let call = CloudCall::AddIngressRule {
                rule_set_id: rule_set_id.to_owned(),
                rule: rule.clone(),
            };
            self.with_state(call, |state| {
                let (_, rules) = state
                    .rule_sets
                    .values_mut()
                    .find(|(id, _)| id == rule_set_id)
                    .ok_or_else(|| FakeCloudError {
                        operation: Operation::AddIngressRule,
                        transient: false,
                        message: format!("rule set {rule_set_id} not found"),
                    })?;
                rules.push(rule.clone());
                Ok(())
            })
        })
    }

    fn delete_rule_set<'a>(&'a self, name: &'a str) -> BackendFuture<'a, (), Self::Error> {
        Box::pin(async move {
            self.with_state(CloudCall::DeleteRuleSet(name.to_owned()), |state| {
                state
                    .rule_sets
                    .remove(name)
                    .map(|_| ())
                    .ok_or_else(|| FakeCloudError {
                        operation: Operation::DeleteRuleSet,
                        transient: false,
                        message: format!("rule set {name} not found"),
                    })
            })
        })
    }

    fn find_rule_set<'a>(
        &'a self,
        name: &'a str,
    ) -> BackendFuture<'a, Option<String>, Self::Error> {
        Box::pin(async move {
            self.with_state(CloudCall::FindRuleSet(name.to_owned()), |state| {
                Ok(state.rule_sets.get(name).map(|(id, _)| id.clone()))
            })
        })
    }
}

impl ComputeBackend for FakeCloud {
    fn launch<'a>(&'a self, request: &'a LaunchRequest) -> BackendFuture<'a, String, Self::Error> {
        Box::pin(async move {
            self.with_state(CloudCall::Launch(request.name.clone()), |state| {
                state.launch_requests.push(request.clone());
                let id = state.next_id("i");
                let mut block_devices = vec![format!("{id}-root")];
                block_devices.extend(
                    (1..=request.block_devices.len()).map(|index| format!("{id}-vol{index}")),
                );
                let address = format!("203.0.113.{}", state.instances.len() + 1);
                let pending_polls = state.pending_polls;
                state.instances.insert(
                    id.clone(),
                    FakeInstance {
                        state: InstanceState::Pending,
                        pending_polls,
                        address,
                        block_devices,
                    },
                );
                Ok(id)
            })
        })
    }

    fn describe_instance<'a>(
        &'a self,
        instance_id: &'a str,
    ) -> BackendFuture<'a, InstanceStatus, Self::Error> {
        Box::pin(async move {
            self.with_state(CloudCall::DescribeInstance(instance_id.to_owned()), |state| {
                let Some(instance) = state.instances.get_mut(instance_id) else {
                    return Ok(InstanceStatus {
                        state: InstanceState::Terminated,
                        public_address: None,
                        block_devices: Vec::new(),
                    });
                };
                match instance.state {
                    InstanceState::Pending if instance.pending_polls == 0 => {
                        instance.state = InstanceState::Running;
                    }
                    InstanceState::Pending => instance.pending_polls -= 1,
                    InstanceState::ShuttingDown => {
                        let status = InstanceStatus {
                            state: InstanceState::ShuttingDown,
                            public_address: None,
                            block_devices: instance.block_devices.clone(),
                        };
                        instance.state = InstanceState::Terminated;
                        return Ok(status);
                    }
                    _ => {}
                }
                let public_address = (instance.state == InstanceState::Running)
                    .then(|| instance.address.clone());
                Ok(InstanceStatus {
                    state: instance.state.clone(),
                    public_address,
                    block_devices: instance.block_devices.clone(),
                })
            })
        })
    }

    fn terminate<'a>(&'a self, instance_id: &'a str) -> BackendFuture<'a, (), Self::Error> {
        Box::pin(async move {
            self.with_state(CloudCall::Terminate(instance_id.to_owned()), |state| {
                if let Some(instance) = state.instances.get_mut(instance_id) {
                    if instance.state != InstanceState::Terminated {
                        instance.state = InstanceState::ShuttingDown;
                    }
                }
                Ok(())
            })
        })
    }
}

impl SnapshotBackend for FakeCloud {
    fn create_snapshot<'a>(
        &'a self,
        volume_id: &'a str,
        description: &'a str,
    ) -> BackendFuture<'a, SnapshotRecord, Self::Error> {
        Box::pin(async move {
            let call = CloudCall::CreateSnapshot {
                volume_id: volume_id.to_owned(),
                description: description.to_owned(),
            };
            self.with_state(call, |state| {
                let record = SnapshotRecord {
                    id: state.next_id("snap"),
                    description: description.to_owned(),
                    state: String::from("creating"),
                };
                state.snapshots.push(record.clone());
                Ok(record)
            })
        })
    }
}

#[derive(Debug, Default)]
struct RemoteState {
    connect_failures: u32,
    targets: Vec<SessionTarget>,
    sessions: usize,
    commands: Vec<String>,
    failing: Vec<(String, i32)>,
}

/// Remote connector that records sessions and commands.
#[derive(Clone, Debug, Default)]
pub struct FakeRemote {
    state: SharedMutex<RemoteState>,
}

/// Session opened by [`FakeRemote`].
#[derive(Debug)]
pub struct FakeSession {
    state: SharedMutex<RemoteState>,
}

impl FakeRemote {
    /// Creates a connector whose hosts accept every connection.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Refuses the next `attempts` connections.
    pub fn fail_connects(&self, attempts: u32) {
        lock(&self.state).connect_failures = attempts;
    }

    /// Makes every command containing `fragment` exit with `code`.
    pub fn fail_command_containing(&self, fragment: &str, code: i32) {
        lock(&self.state).failing.push((fragment.to_owned(), code));
    }

    /// Targets of every connection attempt.
    #[must_use]
    pub fn connect_targets(&self) -> Vec<SessionTarget> {
        lock(&self.state).targets.clone()
    }

    /// Sessions successfully opened.
    #[must_use]
    pub fn sessions_opened(&self) -> usize {
        lock(&self.state).sessions
    }

    /// Commands executed across all sessions.
    #[must_use]
    pub fn commands(&self) -> Vec<String> {
        lock(&self.state).commands.clone()
    }
}

impl RemoteConnector for FakeRemote {
    type Session = FakeSession;

    fn connect(&self, target: &SessionTarget) -> Result<Self::Session, RemoteError> {
        let mut state = lock(&self.state);
        state.targets.push(target.clone());
        if state.connect_failures > 0 {
            state.connect_failures -= 1;
            return Err(RemoteError::Connect {
                user: target.user.clone(),
                address: target.address.clone(),
                message: String::from("Connection refused"),
            });
        }
        state.sessions += 1;
        Ok(FakeSession {
            state: Arc::clone(&self.state),
        })
    }
}

impl RemoteSession for FakeSession {
    fn execute(&self, command: &str) -> Result<CommandOutput, RemoteError> {
        let mut state = lock(&self.state);
        state.commands.push(command.to_owned());
        let code = state
            .failing
            .iter()
            .find(|(fragment, _)| command.contains(fragment.as_str()))
            .map_or(0, |(_, code)| *code);
        Ok(CommandOutput {
            code: Some(code),
            stdout: String::new(),
            stderr: if code == 0 {
                String::new()
            } else {
                String::from("simulated failure")
            },
        })
    }
}

/// Provider configuration with every required field set.
#[must_use]
pub fn scaleway_config() -> ScalewayConfig {
    ScalewayConfig {
        access_key: None,
        secret_key: String::from("secret"),
        default_organization_id: None,
        default_project_id: String::from("project"),
        default_zone: String::from("fr-par-1"),
        default_region: String::from("fr-par"),
        default_instance_type: String::from("DEV1-S"),
        default_image: String::from("Ubuntu 24.04 Noble Numbat"),
        default_architecture: String::from("x86_64"),
    }
}

/// Valid workflow configuration without delays.
#[must_use]
pub fn backup_config() -> BackupConfig {
    BackupConfig {
        credential_name: String::from("sharesnap-ephemeral-key"),
        key_directory: String::from("."),
        rule_set_prefix: String::from("sharesnap-ephemeral"),
        ssh_bin: String::from("ssh"),
        ssh_user: String::from("root"),
        ssh_port: 22,
        ssh_known_hosts_file: String::from("/dev/null"),
        share_region: String::from("fr-par"),
        share_dns_suffix: String::from("nfs.{region}.example.net"),
        block_device: String::from("/dev/sdb"),
        filesystem_type: String::from("ext4"),
        share_mount_point: String::from("share"),
        snapshot_mount_point: String::from("snapshot"),
        boot_warmup_secs: 0,
        flush_delay_secs: 0,
        connect_attempts: 5,
        connect_backoff_secs: 0,
        connect_max_backoff_secs: 0,
        api_attempts: 3,
        api_backoff_secs: 0,
        poll_interval_secs: 0,
        poll_max_interval_secs: 0,
        instance_wait_timeout_secs: 5,
        stop_on_critical_failure: true,
        share_page_size: 100,
        max_shares: 1000,
    }
}

/// Copy settings that never sleep.
#[must_use]
pub fn copy_settings() -> CopySettings {
    workflow_settings().copy
}

/// Workflow settings with immediate retries and no delays.
#[must_use]
pub fn workflow_settings() -> WorkflowSettings {
    let mut settings = WorkflowSettings::from_config(&backup_config(), &scaleway_config());
    settings.api_policy = RetryPolicy::immediate(3);
    settings.poll_policy = RetryPolicy::immediate(20);
    settings.flush_delay = Duration::ZERO;
    settings.copy.warmup = Duration::ZERO;
    settings.copy.connect_policy = RetryPolicy::immediate(5);
    settings
}

/// Global mutex used to serialise environment mutation in tests.
pub static ENV_LOCK: AsyncMutex<()> = AsyncMutex::const_new(());

/// Guard that holds the env mutex and cleans up variables on drop.
pub struct EnvGuard {
    previous: Vec<(String, Option<OsString>)>,
    _guard: AsyncMutexGuard<'static, ()>,
}

impl EnvGuard {
    /// Sets multiple environment variables while holding a global mutex.
    pub async fn set_vars(pairs: &[(&str, &str)]) -> Self {
        debug_assert!(
            {
                let mut seen = BTreeSet::new();
                pairs.iter().all(|(key, _)| seen.insert(*key))
            },
            "duplicate environment variable keys passed to EnvGuard::set_vars"
        );

        let guard = ENV_LOCK.lock().await;
        let mut previous = Vec::with_capacity(pairs.len());
        for (key, value) in pairs {
            let old = env::var_os(key);
            // SAFETY: Environment mutation is serialised by `ENV_LOCK`, preventing races.
            unsafe { env::set_var(key, value) };
            previous.push(((*key).to_owned(), old));
        }

        Self {
            previous,
            _guard: guard,
        }
    }
}

impl Drop for EnvGuard {
    fn drop(&mut self) {
        for (key, old) in &self.previous {
            // SAFETY: Environment mutation is serialised by holding `_guard`.
            unsafe {
                match old {
                    Some(val) => env::set_var(key, val),
                    None => env::remove_var(key),
                }
            }
        }
    }
}
