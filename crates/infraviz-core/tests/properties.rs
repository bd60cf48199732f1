use std::collections::BTreeSet;

use infraviz_core::annotations::NodeUpdate;
use infraviz_core::factory::BLANK_CLASS;
use infraviz_core::pipeline::{Handler, HandlerScope};
use infraviz_core::{
    transform, AnnotationDocument, Attributes, Diagnostics, NodeFactory, NodeRef, ProviderRegistry, RawResource,
    ResourceGraph,
};
use proptest::prelude::*;
use serde_json::json;

const VOCABULARY: &[&str] = &[
    "aws_vpc.main",
    "aws_subnet.a",
    "aws_subnet.b",
    "aws_subnet.c",
    "aws_security_group.web",
    "aws_security_group.db",
    "aws_instance.app",
    "aws_instance.app~1",
    "aws_instance.app~2",
    "aws_ebs_volume.data~1",
    "aws_ebs_volume.data~2",
    "aws_iam_instance_profile.app",
    "aws_iam_role.app",
    "aws_iam_role_policy_attachment.app",
    "aws_alb.legacy",
    "aws_lb.web",
    "aws_lb_listener.https",
    "aws_route53_record.www",
    "aws_route53_record.api",
    "aws_ecs_service.api",
    "aws_elasticache_cluster.cache",
    "aws_sqs_queue.jobs",
    "aws_lambda_function.worker",
    "aws_lambda_event_source_mapping.jobs",
    "aws_route_table.private",
    "aws_s3_bucket.assets",
];

const ZONES: &[&str] = &["us-east-1a", "us-east-1b"];

fn vocabulary_graph(edges: &[(usize, usize)]) -> ResourceGraph {
    let mut graph = ResourceGraph::new();
    for (i, id) in VOCABULARY.iter().enumerate() {
        let resource_type = NodeRef::parse(id).resource_type.to_string();
        let mut attrs = Attributes::new();
        if resource_type == "aws_subnet" {
            attrs.insert("availability_zone".into(), json!(ZONES[i % ZONES.len()]));
        }
        graph.add_node(id, &resource_type, attrs);
    }
    for &(a, b) in edges {
        graph.add_edge(VOCABULARY[a], VOCABULARY[b], None);
    }
    graph
}

fn resource(id: &str, dependencies: &[String]) -> RawResource {
    let parsed = NodeRef::parse(id);
    RawResource {
        resource_type: parsed.resource_type.to_string(),
        name: parsed.name.to_string(),
        attributes: Attributes::new(),
        dependencies: dependencies.to_vec(),
        provider_hint: None,
        module: None,
    }
}

fn edge_pairs() -> impl Strategy<Value = Vec<(usize, usize)>> {
    prop::collection::vec((0..VOCABULARY.len(), 0..VOCABULARY.len()), 0..40)
}

proptest! {
    #[test]
    fn final_graph_has_no_duplicate_or_dangling_edges(edges in edge_pairs()) {
        let resources: Vec<RawResource> = VOCABULARY
            .iter()
            .filter(|id| !id.contains('~'))
            .enumerate()
            .map(|(i, id)| {
                let deps: Vec<String> = edges
                    .iter()
                    .filter(|(a, _)| *a == i)
                    .map(|(_, b)| VOCABULARY[*b].to_string())
                    .collect();
                resource(id, &deps)
            })
            .collect();

        let registry = ProviderRegistry::with_builtin();
        let output = transform(resources, &registry, None).unwrap();
        let graph = &output.graph;

        let pairs: Vec<(String, String)> = graph
            .edges()
            .map(|(a, b, _)| (a.to_string(), b.to_string()))
            .collect();
        let unique: BTreeSet<&(String, String)> = pairs.iter().collect();
        prop_assert_eq!(unique.len(), pairs.len());
        for (a, b) in &pairs {
            prop_assert!(a != b);
            prop_assert!(graph.contains_node(a) && graph.contains_node(b));
        }
    }

    #[test]
    fn folding_keeps_every_outside_link(
        listeners in 1usize..4,
        links in prop::collection::vec((0usize..4, 0usize..3, any::<bool>()), 0..10),
    ) {
        let listener_ids: Vec<String> = (0..listeners).map(|i| format!("aws_lb_listener.l{}", i)).collect();
        let outside: Vec<String> = (0..3).map(|j| format!("aws_s3_bucket.b{}", j)).collect();

        let mut before: Vec<(String, String)> = Vec::new();
        let mut resources = vec![resource("aws_lb.main", &[])];
        for listener in &listener_ids {
            let mut deps = vec!["aws_lb.main".to_string()];
            for &(l, o, outbound) in &links {
                if l < listeners && outbound && listener_ids[l] == *listener {
                    deps.push(outside[o].clone());
                    before.push((listener.clone(), outside[o].clone()));
                }
            }
            resources.push(resource(listener, &deps));
        }
        for (j, bucket) in outside.iter().enumerate() {
            let deps: Vec<String> = links
                .iter()
                .filter(|&&(l, o, outbound)| l < listeners && !outbound && o == j)
                .map(|&(l, _, _)| listener_ids[l].clone())
                .collect();
            for dep in &deps {
                before.push((bucket.clone(), dep.clone()));
            }
            resources.push(resource(bucket, &deps));
        }

        let registry = ProviderRegistry::with_builtin();
        let output = transform(resources, &registry, None).unwrap();
        let graph = &output.graph;

        for listener in &listener_ids {
            prop_assert!(!graph.contains_node(listener));
        }
        for (a, b) in &before {
            let other = if a.starts_with("aws_s3_bucket") { a } else { b };
            prop_assert!(
                graph.contains_edge("aws_lb.main", other) || graph.contains_edge(other, "aws_lb.main"),
                "link {} -> {} lost",
                a,
                b
            );
        }
    }

    #[test]
    fn expanded_instances_pair_by_index(subnets in 2usize..5) {
        let subnet_ids: Vec<String> = (0..subnets).map(|i| format!("aws_subnet.s{}", i)).collect();
        let mut service_deps = subnet_ids.clone();
        service_deps.push("aws_elasticache_cluster.cache".to_string());

        let mut resources = vec![
            resource("aws_elasticache_cluster.cache", &subnet_ids),
            resource("aws_ecs_service.api", &service_deps),
        ];
        resources.extend(subnet_ids.iter().map(|id| resource(id, &[])));

        let registry = ProviderRegistry::with_builtin();
        let output = transform(resources, &registry, None).unwrap();
        let graph = &output.graph;

        for k in 1..=subnets {
            let service = format!("aws_ecs_service.api~{}", k);
            let cache = format!("aws_elasticache_cluster.cache~{}", k);
            prop_assert!(graph.contains_edge(&service, &cache));
        }
        for (a, b, _) in graph.edges() {
            let (pa, pb) = (NodeRef::parse(a), NodeRef::parse(b));
            let crossed = pa.resource_type == "aws_ecs_service"
                && pb.resource_type == "aws_elasticache_cluster";
            if crossed {
                prop_assert_eq!(pa.index, pb.index);
            }
        }
    }

    #[test]
    fn uneven_instance_counts_keep_every_link(service_subnets in 2usize..5, cache_subnets in 2usize..5) {
        let subnet_ids: Vec<String> = (0..service_subnets.max(cache_subnets))
            .map(|i| format!("aws_subnet.s{}", i))
            .collect();
        let mut service_deps = subnet_ids[..service_subnets].to_vec();
        service_deps.push("aws_elasticache_cluster.cache".to_string());

        let mut resources = vec![
            resource("aws_elasticache_cluster.cache", &subnet_ids[..cache_subnets]),
            resource("aws_ecs_service.api", &service_deps),
        ];
        resources.extend(subnet_ids.iter().map(|id| resource(id, &[])));

        let registry = ProviderRegistry::with_builtin();
        let output = transform(resources, &registry, None).unwrap();
        let graph = &output.graph;

        for k in 1..=service_subnets {
            let service = format!("aws_ecs_service.api~{}", k);
            let caches: Vec<String> = graph
                .successors(&service)
                .into_iter()
                .filter(|n| n.starts_with("aws_elasticache_cluster.cache~"))
                .collect();
            if service_subnets == cache_subnets {
                prop_assert_eq!(caches, vec![format!("aws_elasticache_cluster.cache~{}", k)]);
            } else {
                prop_assert_eq!(caches.len(), cache_subnets, "{} lost cache links", service);
            }
        }
    }

    #[test]
    fn handlers_are_idempotent(edges in edge_pairs()) {
        let registry = ProviderRegistry::with_builtin();
        let aws = registry.context("aws");
        for registration in &aws.rules().handlers {
            let scope = HandlerScope { ctx: &aws, pattern: &registration.resource };
            for step in &registration.steps {
                let mut once = vocabulary_graph(&edges);
                step.apply(&mut once, &scope, &mut Diagnostics::new());
                let mut twice = once.clone();
                step.apply(&mut twice, &scope, &mut Diagnostics::new());
                prop_assert_eq!(&once, &twice, "step {:?} on {}", step, registration.resource);
            }
        }
    }

    #[test]
    fn every_type_resolves_to_something(resource_type in "\\PC*", provider in 0usize..4) {
        let registry = ProviderRegistry::with_builtin();
        let ctx = registry.context(["aws", "azure", "gcp", "on-prem"][provider]);
        let descriptor = NodeFactory::new().resolve(&ctx, &resource_type, None);
        prop_assert!(!descriptor.class.is_empty());
        if ctx.rules().category_classes.is_empty() && ctx.rules().classes.is_empty() {
            prop_assert_eq!(descriptor.class.as_str(), BLANK_CLASS);
        }
    }

    #[test]
    fn annotated_values_win(label in "[a-z][a-z ]{0,11}", owner in "[a-z]{1,8}") {
        let resources = vec![
            resource("aws_cloudwatch_event_rule.nightly", &[]),
            resource(
                "aws_cloudwatch_event_target.job",
                &["aws_cloudwatch_event_rule.nightly".to_string(), "aws_lambda_function.job".to_string()],
            ),
            resource("aws_lambda_function.job", &[]),
        ];

        let mut update = NodeUpdate::default();
        update.edge_labels.push([("aws_lambda_function.job".to_string(), label.clone())].into());
        update.attributes.insert("owner".into(), json!(owner));
        let mut document = AnnotationDocument::default();
        document.update.insert("aws_cloudwatch_event_rule.nightly".into(), update);

        let registry = ProviderRegistry::with_builtin();
        let output = transform(resources, &registry, Some(document)).unwrap();
        let graph = &output.graph;

        // the link pass labels this edge "triggers" before the overlay runs
        prop_assert_eq!(
            graph.edge_label("aws_cloudwatch_event_rule.nightly", "aws_lambda_function.job"),
            Some(label.as_str())
        );
        prop_assert_eq!(
            &graph.node("aws_cloudwatch_event_rule.nightly").unwrap().attributes["owner"],
            &json!(owner)
        );
    }
}
