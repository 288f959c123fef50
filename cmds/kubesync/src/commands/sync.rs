//! The sync command: load manifests, merge with the source cluster, apply to
//! the target cluster.

use std::{io::Write, path::PathBuf};

use anyhow::{Context, Result};
use bon::Builder;
use clap::Args;
use k8s_openapi::api::{
	apps::v1::Deployment,
	batch::v1::CronJob,
	core::v1::{Service, ServiceAccount},
	rbac::v1::{ClusterRole, ClusterRoleBinding},
};
use regex::Regex;
use tracing::{debug, info, instrument, warn};

use crate::{
	config::{expand_home, ResolvedEnvironment, SyncConfig, DEFAULT_DNS_SEGMENT, DEFAULT_FIELD_MANAGER},
	k8s::{
		apply::{ApplyEngine, ApplyStrategy},
		client::{load_kubeconfig, ClusterConnection},
		resource::{ResourceClient, SyncKind},
		ResourceKind, ResourceScope,
	},
	manifest::{self, LoadedManifest},
	policy::{
		ClusterRoleBindingPolicy, ClusterRolePolicy, CronJobPolicy, DeploymentPolicy, MergePolicy,
		ServiceAccountPolicy, ServicePolicy,
	},
	report::{error_chain, RunSummary},
	sync::{sync_manifests, untracked_objects},
	yaml,
};

#[derive(Args, Debug, Clone)]
pub struct SyncArgs {
	/// Path to the kubeconfig file (defaults to $KUBECONFIG or ~/.kube/config)
	#[arg(long)]
	pub kubeconfig: Option<PathBuf>,

	/// Environment whose manifests are synced (alpha, qa, prod, or one from the config file)
	#[arg(short = 'e', long = "env", default_value = "alpha")]
	pub environment: String,

	/// Manifest directory, overriding the environment's configured root
	#[arg(long)]
	pub path: Option<PathBuf>,

	/// Kubeconfig context (or cluster) name of the source cluster
	#[arg(long)]
	pub source_cluster: Option<String>,

	/// Kubeconfig context of the target cluster (defaults to the current context)
	#[arg(long)]
	pub target_context: Option<String>,

	/// Namespace for manifests that do not set metadata.namespace
	#[arg(long, default_value = "default")]
	pub namespace: String,

	/// Sync Deployments
	#[arg(long)]
	pub deployment: bool,

	/// Sync Services
	#[arg(long)]
	pub service: bool,

	/// Sync CronJobs
	#[arg(long)]
	pub cronjob: bool,

	/// Sync ServiceAccounts
	#[arg(long)]
	pub serviceaccount: bool,

	/// Sync ClusterRoles
	#[arg(long)]
	pub clusterrole: bool,

	/// Sync ClusterRoleBindings
	#[arg(long)]
	pub clusterrolebinding: bool,

	/// Print the synced objects as YAML to stdout
	#[arg(long)]
	pub print: bool,

	/// Sync and print, but do not touch the target cluster
	#[arg(long)]
	pub dry_run: bool,

	/// How objects are written to the target cluster
	#[arg(long, value_enum, default_value_t)]
	pub apply_strategy: ApplyStrategy,

	/// Regex filter on '<Kind>/<name>'; may be repeated
	#[arg(short = 't', long)]
	pub target: Vec<String>,

	/// Warn about source cluster objects without a local manifest
	#[arg(long)]
	pub report_untracked: bool,

	/// Config file (defaults to the nearest .kubesync.yaml)
	#[arg(long)]
	pub config: Option<PathBuf>,
}

impl SyncArgs {
	/// The kind selected by the flags. When several are set, the first in
	/// flag order wins.
	pub fn selected_kind(&self) -> Option<ResourceKind> {
		let flags = [
			self.deployment,
			self.service,
			self.cronjob,
			self.serviceaccount,
			self.clusterrole,
			self.clusterrolebinding,
		];
		ResourceKind::ALL
			.into_iter()
			.zip(flags)
			.find_map(|(kind, set)| set.then_some(kind))
	}
}

/// Options for one sync run, independent of the CLI.
#[derive(Debug, Clone, Builder)]
pub struct SyncOpts {
	pub kind: ResourceKind,
	#[builder(into, default = String::from("default"))]
	pub namespace: String,
	#[builder(into, default = DEFAULT_DNS_SEGMENT.to_string())]
	pub dns_segment: String,
	#[builder(into, default = DEFAULT_FIELD_MANAGER.to_string())]
	pub field_manager: String,
	#[builder(default)]
	pub apply_strategy: ApplyStrategy,
	#[builder(default)]
	pub print: bool,
	#[builder(default)]
	pub dry_run: bool,
	#[builder(default)]
	pub report_untracked: bool,
	/// Regexes matched against `<Kind>/<name>`.
	#[builder(default)]
	pub targets: Vec<String>,
}

/// Run the sync command.
pub async fn run<W: Write>(args: SyncArgs, writer: W) -> Result<RunSummary> {
	let kind = args
		.selected_kind()
		.context("no resource kind selected")?;
	let source_name = args
		.source_cluster
		.as_deref()
		.context("--source-cluster is required")?;

	let cwd = std::env::current_dir().context("getting current directory")?;
	let config = SyncConfig::load(args.config.as_deref(), &cwd).context("loading config")?;
	let env = config
		.resolve(&args.environment, args.path.as_deref())
		.context("resolving environment")?;

	let kubeconfig_path = args.kubeconfig.as_deref().map(expand_home);
	let kubeconfig = load_kubeconfig(kubeconfig_path.as_deref())?;

	let source = ClusterConnection::connect(kubeconfig.clone(), Some(source_name))
		.await
		.context("connecting to source cluster")?;
	let target = if args.dry_run {
		None
	} else {
		Some(
			ClusterConnection::connect(kubeconfig, args.target_context.as_deref())
				.await
				.context("connecting to target cluster")?,
		)
	};

	let opts = SyncOpts::builder()
		.kind(kind)
		.namespace(args.namespace)
		.dns_segment(config.dns_segment)
		.field_manager(config.field_manager)
		.apply_strategy(args.apply_strategy)
		.print(args.print)
		.dry_run(args.dry_run)
		.report_untracked(args.report_untracked)
		.targets(args.target)
		.build();

	sync_environment(&env, &opts, &source, target.as_ref(), writer).await
}

/// Sync the selected kind of one environment.
///
/// `target` may be `None` only for dry runs.
#[instrument(skip_all, fields(env = %env.name, kind = %opts.kind))]
pub async fn sync_environment<W: Write>(
	env: &ResolvedEnvironment,
	opts: &SyncOpts,
	source: &ClusterConnection,
	target: Option<&ClusterConnection>,
	writer: W,
) -> Result<RunSummary> {
	info!(
		root = %env.manifest_root.display(),
		source = %source.context(),
		target_context = target.map(ClusterConnection::context).unwrap_or("-"),
		"syncing"
	);

	let run = KindRun {
		env,
		opts,
		source,
		target,
	};
	match opts.kind {
		ResourceKind::Deployment => run.execute::<Deployment, _, _>(DeploymentPolicy, writer).await,
		ResourceKind::Service => {
			let policy = ServicePolicy::for_environment(&opts.dns_segment, env);
			run.execute::<Service, _, _>(policy, writer).await
		}
		ResourceKind::CronJob => run.execute::<CronJob, _, _>(CronJobPolicy, writer).await,
		ResourceKind::ServiceAccount => {
			run.execute::<ServiceAccount, _, _>(ServiceAccountPolicy, writer)
				.await
		}
		ResourceKind::ClusterRole => run.execute::<ClusterRole, _, _>(ClusterRolePolicy, writer).await,
		ResourceKind::ClusterRoleBinding => {
			run.execute::<ClusterRoleBinding, _, _>(ClusterRoleBindingPolicy, writer)
				.await
		}
	}
}

struct KindRun<'a> {
	env: &'a ResolvedEnvironment,
	opts: &'a SyncOpts,
	source: &'a ClusterConnection,
	target: Option<&'a ClusterConnection>,
}

impl KindRun<'_> {
	async fn execute<K, P, W>(&self, policy: P, writer: W) -> Result<RunSummary>
	where
		K: SyncKind,
		P: MergePolicy<K>,
		W: Write,
	{
		let opts = self.opts;
		let mut summary = RunSummary::default();
		if K::KIND.scope() == ResourceScope::ClusterWide && opts.namespace != "default" {
			debug!(namespace = %opts.namespace, "namespace is ignored for cluster-wide kinds");
		}

		let manifests = manifest::load::<K>(&self.env.manifest_root)?;
		let manifests = filter_targets(manifests, &opts.targets)?;
		summary.loaded = manifests.len();
		if manifests.is_empty() {
			warn!(kind = %K::KIND, "no manifests found");
		}

		let source = ResourceClient::<K>::new(self.source.client().clone(), &opts.namespace);
		if opts.report_untracked {
			if let Err(e) = untracked_objects(&source, &manifests).await {
				warn!(error = %error_chain(&e), "could not list source cluster objects");
			}
		}

		let synced = sync_manifests(&source, &policy, manifests).await;
		summary.synced = synced.len();
		summary.skipped = summary.loaded - summary.synced;

		if opts.print {
			yaml::write_documents(writer, synced.as_slice()).context("writing YAML output")?;
		}

		if opts.dry_run {
			info!(count = synced.len(), "dry run, not applying");
		} else {
			let target = self
				.target
				.context("no target cluster connection")?;
			let engine = ApplyEngine::new(
				ResourceClient::new(target.client().clone(), &opts.namespace),
				policy,
				opts.apply_strategy,
				&opts.field_manager,
			);
			engine.apply_all(&synced, &mut summary).await;
		}

		summary.log(K::KIND);
		Ok(summary)
	}
}

/// Keep manifests whose `<Kind>/<name>` matches any of `filters`. No filters
/// keeps everything.
fn filter_targets<K: SyncKind>(
	manifests: Vec<LoadedManifest<K>>,
	filters: &[String],
) -> Result<Vec<LoadedManifest<K>>> {
	if filters.is_empty() {
		return Ok(manifests);
	}
	let filters = filters
		.iter()
		.map(|f| Regex::new(f))
		.collect::<Result<Vec<_>, _>>()
		.context("invalid target filter regex")?;

	Ok(manifests
		.into_iter()
		.filter(|m| {
			let name = m.object.meta().name.as_deref().unwrap_or_default();
			let target = format!("{}/{}", K::KIND, name);
			filters.iter().any(|f| f.is_match(&target))
		})
		.collect())
}
