use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::OnceLock;

use serde::{Deserialize, Serialize};

use crate::graph::ResourceGraph;

/// Provider-agnostic semantic bucket for a resource type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ServiceCategory {
    #[serde(rename = "network.vpc")]
    NetworkVpc,
    #[serde(rename = "network.zone")]
    NetworkZone,
    #[serde(rename = "network.subnet")]
    NetworkSubnet,
    #[serde(rename = "network.firewall")]
    NetworkFirewall,
    #[serde(rename = "network.gateway")]
    NetworkGateway,
    #[serde(rename = "network.load_balancer")]
    NetworkLoadBalancer,
    #[serde(rename = "network.dns")]
    NetworkDns,
    #[serde(rename = "network.cdn")]
    NetworkCdn,
    #[serde(rename = "network.api_gateway")]
    NetworkApiGateway,
    #[serde(rename = "compute.vm")]
    ComputeVm,
    #[serde(rename = "compute.autoscaling")]
    ComputeAutoscaling,
    #[serde(rename = "compute.container")]
    ComputeContainer,
    #[serde(rename = "compute.kubernetes")]
    ComputeKubernetes,
    #[serde(rename = "compute.serverless")]
    ComputeServerless,
    #[serde(rename = "storage.object")]
    StorageObject,
    #[serde(rename = "storage.file")]
    StorageFile,
    #[serde(rename = "storage.block")]
    StorageBlock,
    #[serde(rename = "database.relational")]
    DatabaseRelational,
    #[serde(rename = "database.nosql")]
    DatabaseNosql,
    #[serde(rename = "database.cache")]
    DatabaseCache,
    #[serde(rename = "messaging.queue")]
    MessagingQueue,
    #[serde(rename = "messaging.topic")]
    MessagingTopic,
    #[serde(rename = "messaging.stream")]
    MessagingStream,
    #[serde(rename = "messaging.event")]
    MessagingEvent,
    #[serde(rename = "security.iam")]
    SecurityIam,
    #[serde(rename = "security.secret")]
    SecuritySecret,
    #[serde(rename = "security.key")]
    SecurityKey,
    #[serde(rename = "security.certificate")]
    SecurityCertificate,
    #[serde(rename = "monitoring.logs")]
    MonitoringLogs,
    #[serde(rename = "monitoring.metrics")]
    MonitoringMetrics,
    #[serde(rename = "external.users")]
    ExternalUsers,
}

impl ServiceCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceCategory::NetworkVpc => "network.vpc",
            ServiceCategory::NetworkZone => "network.zone",
            ServiceCategory::NetworkSubnet => "network.subnet",
            ServiceCategory::NetworkFirewall => "network.firewall",
            ServiceCategory::NetworkGateway => "network.gateway",
            ServiceCategory::NetworkLoadBalancer => "network.load_balancer",
            ServiceCategory::NetworkDns => "network.dns",
            ServiceCategory::NetworkCdn => "network.cdn",
            ServiceCategory::NetworkApiGateway => "network.api_gateway",
            ServiceCategory::ComputeVm => "compute.vm",
            ServiceCategory::ComputeAutoscaling => "compute.autoscaling",
            ServiceCategory::ComputeContainer => "compute.container",
            ServiceCategory::ComputeKubernetes => "compute.kubernetes",
            ServiceCategory::ComputeServerless => "compute.serverless",
            ServiceCategory::StorageObject => "storage.object",
            ServiceCategory::StorageFile => "storage.file",
            ServiceCategory::StorageBlock => "storage.block",
            ServiceCategory::DatabaseRelational => "database.relational",
            ServiceCategory::DatabaseNosql => "database.nosql",
            ServiceCategory::DatabaseCache => "database.cache",
            ServiceCategory::MessagingQueue => "messaging.queue",
            ServiceCategory::MessagingTopic => "messaging.topic",
            ServiceCategory::MessagingStream => "messaging.stream",
            ServiceCategory::MessagingEvent => "messaging.event",
            ServiceCategory::SecurityIam => "security.iam",
            ServiceCategory::SecuritySecret => "security.secret",
            ServiceCategory::SecurityKey => "security.key",
            ServiceCategory::SecurityCertificate => "security.certificate",
            ServiceCategory::MonitoringLogs => "monitoring.logs",
            ServiceCategory::MonitoringMetrics => "monitoring.metrics",
            ServiceCategory::ExternalUsers => "external.users",
        }
    }

    /// Background-to-foreground layer, used to order types that a provider's
    /// draw order does not list. Containers come first.
    pub fn layer(&self) -> u8 {
        match self {
            ServiceCategory::NetworkVpc => 0,
            ServiceCategory::NetworkZone => 1,
            ServiceCategory::NetworkSubnet => 2,
            ServiceCategory::NetworkFirewall => 3,
            ServiceCategory::ComputeAutoscaling => 4,
            ServiceCategory::ComputeKubernetes => 4,
            ServiceCategory::NetworkGateway
            | ServiceCategory::NetworkLoadBalancer
            | ServiceCategory::NetworkApiGateway => 5,
            ServiceCategory::ComputeVm
            | ServiceCategory::ComputeContainer
            | ServiceCategory::ComputeServerless => 6,
            ServiceCategory::DatabaseRelational
            | ServiceCategory::DatabaseNosql
            | ServiceCategory::DatabaseCache
            | ServiceCategory::StorageObject
            | ServiceCategory::StorageFile
            | ServiceCategory::StorageBlock => 7,
            ServiceCategory::MessagingQueue
            | ServiceCategory::MessagingTopic
            | ServiceCategory::MessagingStream
            | ServiceCategory::MessagingEvent => 8,
            ServiceCategory::SecurityIam
            | ServiceCategory::SecuritySecret
            | ServiceCategory::SecurityKey
            | ServiceCategory::SecurityCertificate => 9,
            ServiceCategory::MonitoringLogs | ServiceCategory::MonitoringMetrics => 10,
            ServiceCategory::NetworkDns
            | ServiceCategory::NetworkCdn
            | ServiceCategory::ExternalUsers => 11,
        }
    }
}

impl fmt::Display for ServiceCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

use ServiceCategory as C;

// Entries ending in `*` are prefix entries; the longest matching prefix wins
// and exact entries always beat prefixes.
const TABLE: &[(&str, ServiceCategory)] = &[
    // aws
    ("aws_vpc", C::NetworkVpc),
    ("aws_az", C::NetworkZone),
    ("aws_subnet", C::NetworkSubnet),
    ("aws_security_group", C::NetworkFirewall),
    ("aws_network_acl", C::NetworkFirewall),
    ("aws_wafv2_*", C::NetworkFirewall),
    ("aws_internet_gateway", C::NetworkGateway),
    ("aws_nat_gateway", C::NetworkGateway),
    ("aws_vpn_gateway", C::NetworkGateway),
    ("aws_ec2_transit_gateway*", C::NetworkGateway),
    ("aws_lb*", C::NetworkLoadBalancer),
    ("aws_alb*", C::NetworkLoadBalancer),
    ("aws_elb", C::NetworkLoadBalancer),
    ("aws_route53_*", C::NetworkDns),
    ("aws_cloudfront_*", C::NetworkCdn),
    ("aws_api_gateway_*", C::NetworkApiGateway),
    ("aws_apigatewayv2_*", C::NetworkApiGateway),
    ("aws_instance", C::ComputeVm),
    ("aws_launch_template", C::ComputeVm),
    ("aws_autoscaling_group", C::ComputeAutoscaling),
    ("aws_ecs_*", C::ComputeContainer),
    ("aws_ecr_repository", C::ComputeContainer),
    ("aws_eks_*", C::ComputeKubernetes),
    ("aws_lambda_*", C::ComputeServerless),
    ("aws_s3_*", C::StorageObject),
    ("aws_efs_*", C::StorageFile),
    ("aws_ebs_volume", C::StorageBlock),
    ("aws_db_instance", C::DatabaseRelational),
    ("aws_rds_*", C::DatabaseRelational),
    ("aws_dynamodb_*", C::DatabaseNosql),
    ("aws_elasticache_*", C::DatabaseCache),
    ("aws_sqs_*", C::MessagingQueue),
    ("aws_sns_*", C::MessagingTopic),
    ("aws_kinesis_*", C::MessagingStream),
    ("aws_cloudwatch_event_*", C::MessagingEvent),
    ("aws_iam_*", C::SecurityIam),
    ("aws_secretsmanager_*", C::SecuritySecret),
    ("aws_kms_*", C::SecurityKey),
    ("aws_acm_*", C::SecurityCertificate),
    ("aws_cloudwatch_log_*", C::MonitoringLogs),
    ("aws_cloudwatch_metric_alarm", C::MonitoringMetrics),
    ("tv_aws_users", C::ExternalUsers),
    // azure
    ("azurerm_virtual_network", C::NetworkVpc),
    ("azurerm_subnet", C::NetworkSubnet),
    ("azurerm_network_security_group", C::NetworkFirewall),
    ("azurerm_firewall", C::NetworkFirewall),
    ("azurerm_nat_gateway", C::NetworkGateway),
    ("azurerm_virtual_network_gateway", C::NetworkGateway),
    ("azurerm_application_gateway", C::NetworkLoadBalancer),
    ("azurerm_lb*", C::NetworkLoadBalancer),
    ("azurerm_dns_*", C::NetworkDns),
    ("azurerm_private_dns_*", C::NetworkDns),
    ("azurerm_cdn_*", C::NetworkCdn),
    ("azurerm_api_management*", C::NetworkApiGateway),
    ("azurerm_linux_virtual_machine", C::ComputeVm),
    ("azurerm_windows_virtual_machine", C::ComputeVm),
    ("azurerm_virtual_machine", C::ComputeVm),
    ("azurerm_linux_virtual_machine_scale_set", C::ComputeAutoscaling),
    ("azurerm_windows_virtual_machine_scale_set", C::ComputeAutoscaling),
    ("azurerm_container_group", C::ComputeContainer),
    ("azurerm_container_registry", C::ComputeContainer),
    ("azurerm_kubernetes_cluster*", C::ComputeKubernetes),
    ("azurerm_function_app", C::ComputeServerless),
    ("azurerm_linux_function_app", C::ComputeServerless),
    ("azurerm_windows_function_app", C::ComputeServerless),
    ("azurerm_storage_account", C::StorageObject),
    ("azurerm_storage_container", C::StorageObject),
    ("azurerm_storage_share", C::StorageFile),
    ("azurerm_managed_disk", C::StorageBlock),
    ("azurerm_mssql_*", C::DatabaseRelational),
    ("azurerm_postgresql_*", C::DatabaseRelational),
    ("azurerm_mysql_*", C::DatabaseRelational),
    ("azurerm_cosmosdb_*", C::DatabaseNosql),
    ("azurerm_redis_cache", C::DatabaseCache),
    ("azurerm_servicebus_queue", C::MessagingQueue),
    ("azurerm_servicebus_topic", C::MessagingTopic),
    ("azurerm_eventhub*", C::MessagingStream),
    ("azurerm_eventgrid_*", C::MessagingEvent),
    ("azurerm_role_assignment", C::SecurityIam),
    ("azurerm_user_assigned_identity", C::SecurityIam),
    ("azuread_*", C::SecurityIam),
    ("azurerm_key_vault_secret", C::SecuritySecret),
    ("azurerm_key_vault", C::SecurityKey),
    ("azurerm_key_vault_key", C::SecurityKey),
    ("azurerm_log_analytics_workspace", C::MonitoringLogs),
    ("azurerm_monitor_*", C::MonitoringMetrics),
    // gcp
    ("google_compute_network", C::NetworkVpc),
    ("google_compute_subnetwork", C::NetworkSubnet),
    ("google_compute_firewall", C::NetworkFirewall),
    ("google_compute_router*", C::NetworkGateway),
    ("google_compute_forwarding_rule", C::NetworkLoadBalancer),
    ("google_compute_global_forwarding_rule", C::NetworkLoadBalancer),
    ("google_compute_backend_service", C::NetworkLoadBalancer),
    ("google_compute_url_map", C::NetworkLoadBalancer),
    ("google_dns_*", C::NetworkDns),
    ("google_api_gateway_*", C::NetworkApiGateway),
    ("google_compute_instance", C::ComputeVm),
    ("google_compute_instance_template", C::ComputeVm),
    ("google_compute_instance_group_manager", C::ComputeAutoscaling),
    ("google_compute_region_instance_group_manager", C::ComputeAutoscaling),
    ("google_cloud_run_*", C::ComputeContainer),
    ("google_container_*", C::ComputeKubernetes),
    ("google_cloudfunctions_function", C::ComputeServerless),
    ("google_cloudfunctions2_function", C::ComputeServerless),
    ("google_storage_*", C::StorageObject),
    ("google_filestore_instance", C::StorageFile),
    ("google_compute_disk", C::StorageBlock),
    ("google_sql_*", C::DatabaseRelational),
    ("google_spanner_*", C::DatabaseRelational),
    ("google_firestore_*", C::DatabaseNosql),
    ("google_bigtable_*", C::DatabaseNosql),
    ("google_redis_instance", C::DatabaseCache),
    ("google_pubsub_subscription", C::MessagingQueue),
    ("google_pubsub_topic", C::MessagingTopic),
    ("google_eventarc_*", C::MessagingEvent),
    ("google_service_account*", C::SecurityIam),
    ("google_project_iam_*", C::SecurityIam),
    ("google_secret_manager_*", C::SecuritySecret),
    ("google_kms_*", C::SecurityKey),
    ("google_logging_*", C::MonitoringLogs),
    ("google_monitoring_*", C::MonitoringMetrics),
];

/// Static resource-type → category table shared by every provider.
#[derive(Debug)]
pub struct ServiceMapping {
    exact: HashMap<&'static str, ServiceCategory>,
    // sorted longest prefix first
    prefixes: Vec<(&'static str, ServiceCategory)>,
}

impl ServiceMapping {
    fn build() -> Self {
        let mut exact = HashMap::new();
        let mut prefixes = Vec::new();
        for &(key, category) in TABLE {
            match key.strip_suffix('*') {
                Some(prefix) => prefixes.push((prefix, category)),
                None => {
                    exact.insert(key, category);
                }
            }
        }
        prefixes.sort_by(|a, b| b.0.len().cmp(&a.0.len()).then(a.0.cmp(b.0)));
        Self { exact, prefixes }
    }

    pub fn global() -> &'static ServiceMapping {
        static MAPPING: OnceLock<ServiceMapping> = OnceLock::new();
        MAPPING.get_or_init(ServiceMapping::build)
    }

    pub fn category(&self, resource_type: &str) -> Option<ServiceCategory> {
        if let Some(c) = self.exact.get(resource_type) {
            return Some(*c);
        }
        self.prefixes
            .iter()
            .find(|(prefix, _)| resource_type.starts_with(prefix))
            .map(|(_, c)| *c)
    }

    /// Visible node ids bucketed by category, for cross-provider grouping.
    /// Uncategorised nodes are left out.
    pub fn group(&self, graph: &ResourceGraph) -> BTreeMap<ServiceCategory, Vec<String>> {
        let mut groups: BTreeMap<ServiceCategory, Vec<String>> = BTreeMap::new();
        for (id, node) in graph.nodes() {
            if node.hidden {
                continue;
            }
            if let Some(c) = self.category(&node.resource_type) {
                groups.entry(c).or_default().push(id.to_string());
            }
        }
        groups
    }
}

/// Shorthand for `ServiceMapping::global().category(..)`.
pub fn category(resource_type: &str) -> Option<ServiceCategory> {
    ServiceMapping::global().category(resource_type)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::Attributes;

    #[test]
    fn same_concept_maps_to_same_category_across_providers() {
        assert_eq!(category("aws_instance"), Some(C::ComputeVm));
        assert_eq!(category("azurerm_linux_virtual_machine"), Some(C::ComputeVm));
        assert_eq!(category("google_compute_instance"), Some(C::ComputeVm));
        assert_eq!(category("aws_vpc"), Some(C::NetworkVpc));
        assert_eq!(category("google_compute_network"), Some(C::NetworkVpc));
    }

    #[test]
    fn exact_beats_prefix_and_longest_prefix_wins() {
        // `aws_cloudwatch_log_*` is longer than any other matching prefix
        assert_eq!(category("aws_cloudwatch_log_group"), Some(C::MonitoringLogs));
        assert_eq!(category("aws_cloudwatch_event_rule"), Some(C::MessagingEvent));
        assert_eq!(category("azurerm_key_vault_secret"), Some(C::SecuritySecret));
        assert_eq!(category("azurerm_key_vault"), Some(C::SecurityKey));
    }

    #[test]
    fn unknown_types_have_no_category() {
        assert_eq!(category("random_string"), None);
        assert_eq!(category(""), None);
    }

    #[test]
    fn category_serializes_dotted() {
        assert_eq!(serde_json::to_string(&C::StorageObject).unwrap(), "\"storage.object\"");
        let parsed: ServiceCategory = serde_json::from_str("\"network.vpc\"").unwrap();
        assert_eq!(parsed, C::NetworkVpc);
        assert_eq!(C::DatabaseCache.to_string(), "database.cache");
    }

    #[test]
    fn group_buckets_visible_nodes() {
        let mut g = ResourceGraph::new();
        g.add_node("aws_s3_bucket.a", "aws_s3_bucket", Attributes::new());
        g.add_node("google_storage_bucket.b", "google_storage_bucket", Attributes::new());
        g.add_node("aws_instance.hidden", "aws_instance", Attributes::new()).hidden = true;
        let groups = ServiceMapping::global().group(&g);
        assert_eq!(
            groups.get(&C::StorageObject).unwrap(),
            &vec!["aws_s3_bucket.a".to_string(), "google_storage_bucket.b".to_string()]
        );
        assert!(!groups.contains_key(&C::ComputeVm));
    }
}
