//! Per-kind merge policies.
//!
//! A policy decides which fields move between the local manifest, the object
//! fetched from the source cluster, and the live object on the target
//! cluster. Directions differ per kind: images and replicas flow from the
//! source into the manifest, while a CronJob's schedule flows from the
//! manifest onto the source object.

use std::collections::BTreeMap;

use k8s_openapi::api::{
	apps::v1::Deployment,
	batch::v1::CronJob,
	core::v1::{Container, Service, ServiceAccount},
	rbac::v1::{ClusterRole, ClusterRoleBinding},
};

use crate::config::ResolvedEnvironment;

/// Annotation holding the external-dns hostname(s) of a service.
pub const DNS_HOSTNAME_ANNOTATION: &str = "external-dns.alpha.kubernetes.io/hostname";
/// Annotation marking an AWS load balancer as internal.
pub const INTERNAL_LB_ANNOTATION: &str = "service.beta.kubernetes.io/aws-load-balancer-internal";
/// Annotation listing the subnets of an AWS load balancer.
pub const LB_SUBNETS_ANNOTATION: &str = "service.beta.kubernetes.io/aws-load-balancer-subnets";

/// Field-level merge strategy for one kind.
pub trait MergePolicy<K> {
	/// Sync step: combine the object fetched from the source cluster with the
	/// local manifest. After the call `local` is what gets applied.
	fn merge_from_source(&self, local: &mut K, source: &mut K);

	/// Apply step: fold the fields this policy owns from `desired` into the
	/// live object on the target cluster.
	fn merge_into_live(&self, live: &mut K, desired: &K);
}

/// Map container name to image for every container that has one.
fn image_map(containers: &[Container]) -> BTreeMap<&str, &str> {
	containers
		.iter()
		.filter_map(|c| Some((c.name.as_str(), c.image.as_deref()?)))
		.collect()
}

/// Overwrite the image of each container whose name appears in `images`.
fn overwrite_images(containers: &mut [Container], images: &BTreeMap<&str, &str>) {
	for container in containers {
		if let Some(image) = images.get(container.name.as_str()) {
			container.image = Some((*image).to_string());
		}
	}
}

fn deployment_containers(deployment: &Deployment) -> &[Container] {
	deployment
		.spec
		.as_ref()
		.and_then(|s| s.template.spec.as_ref())
		.map(|p| p.containers.as_slice())
		.unwrap_or_default()
}

fn deployment_containers_mut(deployment: &mut Deployment) -> Option<&mut Vec<Container>> {
	deployment
		.spec
		.as_mut()
		.and_then(|s| s.template.spec.as_mut())
		.map(|p| &mut p.containers)
}

fn cronjob_containers(job: &CronJob) -> &[Container] {
	job.spec
		.as_ref()
		.and_then(|s| s.job_template.spec.as_ref())
		.and_then(|s| s.template.spec.as_ref())
		.map(|p| p.containers.as_slice())
		.unwrap_or_default()
}

fn cronjob_containers_mut(job: &mut CronJob) -> Option<&mut Vec<Container>> {
	job.spec
		.as_mut()
		.and_then(|s| s.job_template.spec.as_mut())
		.and_then(|s| s.template.spec.as_mut())
		.map(|p| &mut p.containers)
}

/// Images by container name plus the replica count come from the source.
#[derive(Debug, Clone, Copy, Default)]
pub struct DeploymentPolicy;

impl MergePolicy<Deployment> for DeploymentPolicy {
	fn merge_from_source(&self, local: &mut Deployment, source: &mut Deployment) {
		let images = image_map(deployment_containers(source));
		if let Some(containers) = deployment_containers_mut(local) {
			overwrite_images(containers, &images);
		}

		let replicas = source.spec.as_ref().and_then(|s| s.replicas);
		local.spec.get_or_insert_with(Default::default).replicas = replicas;
	}

	fn merge_into_live(&self, live: &mut Deployment, desired: &Deployment) {
		let images = image_map(deployment_containers(desired));
		if let Some(containers) = deployment_containers_mut(live) {
			overwrite_images(containers, &images);
		}

		let replicas = desired.spec.as_ref().and_then(|s| s.replicas);
		live.spec.get_or_insert_with(Default::default).replicas = replicas;
	}
}

/// Job template images come from the source; the schedule of the local
/// manifest is written onto the source object.
#[derive(Debug, Clone, Copy, Default)]
pub struct CronJobPolicy;

impl MergePolicy<CronJob> for CronJobPolicy {
	fn merge_from_source(&self, local: &mut CronJob, source: &mut CronJob) {
		if let (Some(local_spec), Some(source_spec)) = (local.spec.as_ref(), source.spec.as_mut()) {
			source_spec.schedule.clone_from(&local_spec.schedule);
		}

		let images = image_map(cronjob_containers(source));
		if let Some(containers) = cronjob_containers_mut(local) {
			overwrite_images(containers, &images);
		}
	}

	fn merge_into_live(&self, live: &mut CronJob, desired: &CronJob) {
		let images = image_map(cronjob_containers(desired));
		if let Some(containers) = cronjob_containers_mut(live) {
			overwrite_images(containers, &images);
		}

		if let (Some(live_spec), Some(desired_spec)) = (live.spec.as_mut(), desired.spec.as_ref()) {
			live_spec.schedule.clone_from(&desired_spec.schedule);
		}
	}
}

/// Rewrites DNS and load balancer annotations for the target environment.
///
/// The source object only has to exist; none of its fields are copied.
#[derive(Debug, Clone)]
pub struct ServicePolicy {
	dns_segment: String,
	private_subnets: Vec<String>,
}

impl ServicePolicy {
	pub fn new(dns_segment: impl Into<String>, private_subnets: Vec<String>) -> Self {
		Self {
			dns_segment: dns_segment.into(),
			private_subnets,
		}
	}

	pub fn for_environment(dns_segment: &str, env: &ResolvedEnvironment) -> Self {
		Self::new(dns_segment, env.private_subnets.clone())
	}

	/// Apply the annotation rewrite to a service in place.
	pub fn rewrite_annotations(&self, service: &mut Service) {
		let Some(annotations) = service.metadata.annotations.as_mut() else {
			return;
		};

		if let Some(hostnames) = annotations.get_mut(DNS_HOSTNAME_ANNOTATION) {
			*hostnames = hostnames
				.split(',')
				.map(|h| insert_dns_segment(h.trim(), &self.dns_segment))
				.collect::<Vec<_>>()
				.join(",");
		}

		if let Some(internal) = annotations.get_mut(INTERNAL_LB_ANNOTATION) {
			*internal = "true".to_string();
			if !self.private_subnets.is_empty() {
				annotations.insert(
					LB_SUBNETS_ANNOTATION.to_string(),
					self.private_subnets.join(","),
				);
			}
		}
	}
}

/// Insert `segment` after the first label of `hostname`.
///
/// Unlike a plain insertion, a name whose second label already is `segment`
/// is returned unchanged, so rewriting twice never yields `app.blue.blue...`.
/// Single-label names are returned unchanged too.
pub fn insert_dns_segment(hostname: &str, segment: &str) -> String {
	match hostname.split_once('.') {
		Some((first, rest)) if !rest.is_empty() => {
			if rest.split('.').next() == Some(segment) {
				hostname.to_string()
			} else {
				format!("{first}.{segment}.{rest}")
			}
		}
		_ => hostname.to_string(),
	}
}

impl MergePolicy<Service> for ServicePolicy {
	fn merge_from_source(&self, local: &mut Service, _source: &mut Service) {
		self.rewrite_annotations(local);
	}

	fn merge_into_live(&self, live: &mut Service, desired: &Service) {
		live.metadata.annotations.clone_from(&desired.metadata.annotations);
	}
}

/// The source object replaces the manifest wholesale.
#[derive(Debug, Clone, Copy, Default)]
pub struct ServiceAccountPolicy;

impl MergePolicy<ServiceAccount> for ServiceAccountPolicy {
	fn merge_from_source(&self, local: &mut ServiceAccount, source: &mut ServiceAccount) {
		*local = source.clone();
	}

	fn merge_into_live(&self, live: &mut ServiceAccount, desired: &ServiceAccount) {
		let resource_version = live.metadata.resource_version.take();
		*live = desired.clone();
		live.metadata.uid = None;
		live.metadata.resource_version = resource_version;
	}
}

/// Rules come from the source.
#[derive(Debug, Clone, Copy, Default)]
pub struct ClusterRolePolicy;

impl MergePolicy<ClusterRole> for ClusterRolePolicy {
	fn merge_from_source(&self, local: &mut ClusterRole, source: &mut ClusterRole) {
		local.rules.clone_from(&source.rules);
	}

	fn merge_into_live(&self, live: &mut ClusterRole, desired: &ClusterRole) {
		live.rules.clone_from(&desired.rules);
	}
}

/// Subjects and role reference come from the source.
#[derive(Debug, Clone, Copy, Default)]
pub struct ClusterRoleBindingPolicy;

impl MergePolicy<ClusterRoleBinding> for ClusterRoleBindingPolicy {
	fn merge_from_source(&self, local: &mut ClusterRoleBinding, source: &mut ClusterRoleBinding) {
		local.subjects.clone_from(&source.subjects);
		local.role_ref.clone_from(&source.role_ref);
	}

	fn merge_into_live(&self, live: &mut ClusterRoleBinding, desired: &ClusterRoleBinding) {
		live.subjects.clone_from(&desired.subjects);
		live.role_ref.clone_from(&desired.role_ref);
	}
}
