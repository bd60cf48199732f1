use std::fs;

use infraviz_core::provider::ConfigLocator;
use infraviz_core::{
    transform, AnnotationDocument, Diagnostics, NodeFactory, Pipeline, PipelineError, ProviderDescriptor, ProviderRegistry,
    RawResource, RenderableKind, ResourceGraph,
};
use serde_json::json;

fn resource(id: &str, dependencies: &[&str]) -> RawResource {
    let (resource_type, name) = id.split_once('.').unwrap();
    RawResource {
        resource_type: resource_type.to_string(),
        name: name.to_string(),
        attributes: Default::default(),
        dependencies: dependencies.iter().map(|d| d.to_string()).collect(),
        provider_hint: None,
        module: None,
    }
}

fn graph(resources: Vec<RawResource>) -> ResourceGraph {
    ResourceGraph::from_resources(resources, &mut Diagnostics::new())
}

#[test]
fn instance_reaches_role_through_profile() {
    let registry = ProviderRegistry::with_builtin();
    let output = transform(
        vec![
            resource("aws_instance.web", &["aws_iam_instance_profile.web"]),
            resource("aws_iam_instance_profile.web", &["aws_iam_role.web"]),
            resource("aws_iam_role.web", &[]),
        ],
        &registry,
        None,
    )
    .unwrap();

    let g = &output.graph;
    assert!(g.contains_edge("aws_instance.web", "aws_iam_role.web"));
    let profile = g.node("aws_iam_instance_profile.web").unwrap();
    assert!(!profile.hidden);
}

#[test]
fn file_system_adopts_its_mount_targets() {
    let registry = ProviderRegistry::with_builtin();
    let output = transform(
        vec![
            resource("aws_efs_file_system.fs", &[]),
            resource("aws_efs_mount_target.a", &["aws_efs_file_system.fs"]),
            resource("aws_efs_mount_target.b", &["aws_efs_file_system.fs"]),
        ],
        &registry,
        None,
    )
    .unwrap();

    let g = &output.graph;
    assert_eq!(
        g.successors("aws_efs_file_system.fs"),
        vec!["aws_efs_mount_target.a", "aws_efs_mount_target.b"]
    );
    let top = g.top_level_nodes();
    assert!(!top.contains(&"aws_efs_mount_target.a".to_string()));
    assert!(!top.contains(&"aws_efs_mount_target.b".to_string()));
}

#[test]
fn cache_cluster_splits_across_subnets() {
    let registry = ProviderRegistry::with_builtin();
    let output = transform(
        vec![
            resource(
                "aws_elasticache_cluster.main",
                &["aws_subnet.a", "aws_subnet.b", "aws_subnet.c"],
            ),
            resource("aws_subnet.a", &[]),
            resource("aws_subnet.b", &[]),
            resource("aws_subnet.c", &[]),
        ],
        &registry,
        None,
    )
    .unwrap();

    let g = &output.graph;
    assert!(!g.contains_node("aws_elasticache_cluster.main"));
    for (k, subnet) in ["aws_subnet.a", "aws_subnet.b", "aws_subnet.c"].iter().enumerate() {
        let instance = format!("aws_elasticache_cluster.main~{}", k + 1);
        assert!(g.contains_node(&instance), "{instance} missing");
        assert!(g.contains_edge(subnet, &instance));
    }
}

#[test]
fn disconnect_pattern_removes_matching_edges() {
    let registry = ProviderRegistry::with_builtin();
    let document = AnnotationDocument::from_yaml("disconnect:\n  \"logs*\": [\"service.a\"]\n").unwrap();
    let output = transform(
        vec![
            resource("aws_s3_bucket.assets", &[]),
            resource("logs_group.x", &["service.a"]),
            resource("service.a", &[]),
        ],
        &registry,
        Some(document),
    )
    .unwrap();

    assert!(!output.graph.contains_edge("logs_group.x", "service.a"));
    assert!(output.graph.contains_node("logs_group.x"));
    assert_eq!(output.detection.unclassified, vec!["logs_group.x", "service.a"]);
}

#[test]
fn no_provider_is_fatal() {
    let registry = ProviderRegistry::with_builtin();
    let err = transform(
        vec![resource("custom_thing.a", &[]), resource("other_thing.b", &["custom_thing.a"])],
        &registry,
        None,
    )
    .unwrap_err();

    match err {
        PipelineError::NoProviderDetected { node_count, .. } => assert_eq!(node_count, 2),
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn malformed_overlay_stops_before_any_pass() {
    let registry = ProviderRegistry::with_builtin();
    let document = AnnotationDocument::from_yaml("add:\n  \"aws_*.x\": {}\n").unwrap();
    let result = Pipeline::new(&registry)
        .with_annotations(document)
        .run(graph(vec![resource("aws_s3_bucket.a", &[])]));
    assert!(matches!(result, Err(PipelineError::Annotation(_))));
}

#[test]
fn mixed_providers_run_primary_first() {
    let registry = ProviderRegistry::with_builtin();
    let output = transform(
        vec![
            resource("aws_s3_bucket.a", &[]),
            resource("aws_s3_bucket.b", &[]),
            resource("google_storage_bucket.c", &[]),
        ],
        &registry,
        None,
    )
    .unwrap();

    assert_eq!(output.detection.primary, "aws");
    assert_eq!(output.detection.providers, vec!["aws", "gcp"]);
    assert_eq!(output.detection.counts["gcp"], 1);
    assert_eq!(output.draw_order.len(), 3);
}

#[test]
fn default_annotations_add_users_in_front_of_dns() {
    let registry = ProviderRegistry::with_builtin();
    let output = transform(
        vec![resource("aws_route53_record.www", &[]), resource("aws_instance.web", &[])],
        &registry,
        None,
    )
    .unwrap();

    let g = &output.graph;
    // route53 records are folded into a single dns node first
    assert!(g.contains_node("aws_route53_record.dns"));
    assert!(g.contains_edge("tv_aws_users.users", "aws_route53_record.dns"));
    assert_eq!(g.node("tv_aws_users.users").unwrap().label.as_deref(), Some("Users"));
}

#[test]
fn user_connections_survive_cycle_removal() {
    let registry = ProviderRegistry::with_builtin();
    let document =
        AnnotationDocument::from_yaml("connect:\n  aws_lambda_function.worker:\n    - aws_sqs_queue.jobs: polls\n")
            .unwrap();
    let output = transform(
        vec![
            resource("aws_sqs_queue.jobs", &["aws_lambda_function.worker"]),
            resource("aws_lambda_function.worker", &[]),
        ],
        &registry,
        Some(document),
    )
    .unwrap();

    // queues are forced origins; the annotated reverse link stays beside it
    let g = &output.graph;
    assert!(g.contains_edge("aws_sqs_queue.jobs", "aws_lambda_function.worker"));
    assert_eq!(
        g.edge_label("aws_lambda_function.worker", "aws_sqs_queue.jobs"),
        Some("polls")
    );
    assert!(output
        .diagnostics
        .warnings()
        .any(|d| d.message.contains("against the declared direction")));
}

#[test]
fn reasserted_link_leaves_undeclared_cycle_alone() {
    let registry = ProviderRegistry::with_builtin();
    let document =
        AnnotationDocument::from_yaml("connect:\n  aws_instance.a:\n    - aws_s3_bucket.b: reads\n").unwrap();
    let output = transform(
        vec![
            resource("aws_instance.a", &["aws_s3_bucket.b"]),
            resource("aws_s3_bucket.b", &["aws_instance.a"]),
        ],
        &registry,
        Some(document),
    )
    .unwrap();

    let g = &output.graph;
    assert_eq!(g.edge_label("aws_instance.a", "aws_s3_bucket.b"), Some("reads"));
    assert!(g.contains_edge("aws_s3_bucket.b", "aws_instance.a"));
}

#[test]
fn uneven_expansions_keep_every_dependency() {
    let registry = ProviderRegistry::with_builtin();
    let output = transform(
        vec![
            resource(
                "aws_ecs_service.api",
                &["aws_subnet.a", "aws_subnet.b", "aws_subnet.c", "aws_elasticache_cluster.cache"],
            ),
            resource("aws_elasticache_cluster.cache", &["aws_subnet.a", "aws_subnet.b"]),
            resource("aws_subnet.a", &[]),
            resource("aws_subnet.b", &[]),
            resource("aws_subnet.c", &[]),
        ],
        &registry,
        None,
    )
    .unwrap();

    let g = &output.graph;
    for k in 1..=3 {
        let service = format!("aws_ecs_service.api~{}", k);
        for j in 1..=2 {
            let cache = format!("aws_elasticache_cluster.cache~{}", j);
            assert!(g.contains_edge(&service, &cache), "{service} -> {cache}");
        }
    }
}

#[test]
fn overlapping_provider_leaves_other_records_alone() {
    let mut registry = ProviderRegistry::with_builtin();
    registry.register(ProviderDescriptor::new(
        "dns",
        &["aws_route53_"],
        ConfigLocator::Embedded("{}"),
    ));
    let output = transform(
        vec![
            resource("aws_route53_record.www", &[]),
            resource("aws_route53_record.api", &[]),
            resource("aws_s3_bucket.x", &[]),
            resource("aws_s3_bucket.y", &[]),
            resource("aws_s3_bucket.z", &[]),
        ],
        &registry,
        None,
    )
    .unwrap();

    assert_eq!(output.detection.counts["dns"], 2);
    let g = &output.graph;
    assert!(g.contains_node("aws_route53_record.www"));
    assert!(g.contains_node("aws_route53_record.api"));
    assert!(!g.contains_node("aws_route53_record.dns"));
}

#[test]
fn snapshots_follow_pass_order() {
    let registry = ProviderRegistry::with_builtin();
    let output = Pipeline::new(&registry)
        .with_snapshots(true)
        .run(graph(vec![resource("aws_s3_bucket.a", &[])]))
        .unwrap();
    let passes: Vec<String> = output.snapshots.iter().map(|s| s.pass.to_string()).collect();
    assert_eq!(
        passes,
        vec!["handlers", "transitive_links", "consolidation", "expansion", "annotations", "dedup"]
    );
    let restored: ResourceGraph = serde_json::from_str(&output.snapshots[0].graph).unwrap();
    assert!(restored.contains_node("aws_s3_bucket.a"));
}

#[test]
fn per_provider_runs_are_independent() {
    let registry = ProviderRegistry::with_builtin();
    let outputs = Pipeline::new(&registry)
        .run_per_provider(graph(vec![
            resource("aws_s3_bucket.a", &[]),
            resource("aws_s3_bucket.b", &[]),
            resource("google_storage_bucket.c", &["aws_s3_bucket.a"]),
            resource("random_id.suffix", &[]),
        ]))
        .unwrap();

    assert_eq!(outputs.len(), 2);
    let aws = &outputs[0];
    assert_eq!(aws.detection.primary, "aws");
    assert!(aws.graph.contains_node("random_id.suffix"));
    assert!(!aws.graph.contains_node("google_storage_bucket.c"));

    let gcp = &outputs[1];
    assert_eq!(gcp.detection.primary, "gcp");
    assert_eq!(gcp.graph.node_ids(), vec!["google_storage_bucket.c"]);
    assert_eq!(gcp.graph.edge_count(), 0);
}

#[test]
fn contexts_load_once_under_contention() {
    let registry = ProviderRegistry::with_builtin();
    std::thread::scope(|scope| {
        for i in 0..8 {
            let registry = &registry;
            scope.spawn(move || {
                let name = if i % 2 == 0 { "aws" } else { "hashicorp/aws" };
                let ctx = registry.context(name);
                assert_eq!(ctx.name(), "aws");
            });
        }
    });
    assert_eq!(registry.load_count(), 1);
}

#[test]
fn override_directory_replaces_builtin_rules() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(
        dir.path().join("aws.json"),
        json!({ "classes": { "aws_instance": "custom.Instance" } }).to_string(),
    )
    .unwrap();
    fs::write(dir.path().join("gcp.json"), "{ not json").unwrap();
    let registry = ProviderRegistry::with_builtin().with_overrides_dir(dir.path());

    let factory = NodeFactory::new();
    let aws = registry.context("aws");
    let instance = factory.resolve(&aws, "aws_instance", None);
    assert_eq!(instance.class, "custom.Instance");
    assert_eq!(instance.kind, RenderableKind::Concrete);
    assert!(aws.rules().links.is_empty());

    // a broken bundle degrades to an empty rule set
    let gcp = registry.context("gcp");
    assert!(gcp.rules().classes.is_empty());
    assert_eq!(
        factory.resolve(&gcp, "google_compute_instance", None).kind,
        RenderableKind::Blank
    );
}
