// Copyright 2017 Pants project contributors (see CONTRIBUTORS.md).
// Licensed under the Apache License, Version 2.0 (see LICENSE).

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;

use maplit::hashmap;

use graph::Direction;

use crate::address::{Address, Addresses, SiblingAddresses};
use crate::core::{Key, Storable, TypeId};
use crate::fs::{Dir, DirectoryListing, File, FileContent, PathGlobs, ProjectTree, Stat};
use crate::nodes::{self, Complete, Failure, Node, Noop};
use crate::scheduler::{ExecutionRequest, ExecutionStat, LocalScheduler};
use crate::selectors::{Selector, SelectLiteral, SelectProjection};
use crate::tasks::Tasks;

///
/// An in-memory ProjectTree: a sorted map from file path to content.
///
struct MemTree {
    files: BTreeMap<PathBuf, Vec<u8>>,
}

impl MemTree {
    fn new(files: Vec<(&str, &[u8])>) -> Arc<MemTree> {
        Arc::new(MemTree {
            files: files
                .into_iter()
                .map(|(path, content)| (PathBuf::from(path), content.to_vec()))
                .collect(),
        })
    }
}

impl ProjectTree for MemTree {
    fn scandir(&self, dir: &Dir) -> Result<Vec<Stat>, String> {
        let mut files = Vec::new();
        let mut dirs = BTreeSet::new();
        for path in self.files.keys() {
            if let Ok(relative) = path.strip_prefix(&dir.0) {
                let mut components = relative.components();
                match (components.next(), components.next()) {
                    (Some(child), None) => files.push(Stat::File(File(dir.0.join(child)))),
                    (Some(child), Some(_)) => {
                        dirs.insert(dir.0.join(child));
                    }
                    _ => {}
                }
            }
        }
        let mut stats: Vec<Stat> = dirs.into_iter().map(|d| Stat::Dir(Dir(d))).collect();
        stats.extend(files);
        stats.sort_by(|a, b| a.path().cmp(b.path()));
        Ok(stats)
    }

    fn read_file(&self, file: &File) -> Result<Vec<u8>, String> {
        self.files
            .get(&file.0)
            .cloned()
            .ok_or_else(|| format!("No such file: {:?}", file.0))
    }

    fn expand(&self, globs: &PathGlobs) -> Result<Vec<PathBuf>, String> {
        let mut paths = Vec::new();
        for pattern in &globs.include {
            let pattern =
                glob::Pattern::new(pattern).map_err(|e| format!("Invalid glob: {}", e))?;
            paths.extend(
                self.files
                    .keys()
                    .filter(|path| pattern.matches_path(path))
                    .cloned(),
            );
        }
        paths.sort();
        paths.dedup();
        Ok(paths)
    }
}

// Product types used by the scenarios.

#[derive(Clone, Debug, Eq, Hash, PartialEq)]
struct IntList {
    items: Vec<i64>,
}

impl Storable for IntList {
    fn project_multi(&self, field: Option<&str>) -> Option<Vec<Key>> {
        match field {
            Some("items") => Some(self.items.iter().map(|i| Key::new(*i)).collect()),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, Eq, Hash, PartialEq)]
struct Doubled(i64);

impl Storable for Doubled {}

#[derive(Clone, Debug, Eq, Hash, PartialEq)]
struct Tripled(i64);

impl Storable for Tripled {}

#[derive(Clone, Debug, Eq, Hash, PartialEq)]
struct Label(String);

impl Storable for Label {}

#[derive(Clone, Debug, Eq, Hash, PartialEq)]
struct Named {
    name: String,
}

impl Storable for Named {
    fn project(&self, field: &str) -> Option<Key> {
        match field {
            "name" => Some(Key::new(self.name.clone())),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, Eq, Hash, PartialEq)]
struct Holder {
    value: String,
}

impl Storable for Holder {
    fn project(&self, field: &str) -> Option<Key> {
        match field {
            "value" => Some(Key::new(self.value.clone())),
            _ => None,
        }
    }
}

// Fixtures.

fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn empty_tree() -> Arc<MemTree> {
    MemTree::new(vec![])
}

fn scheduler(tasks: Tasks, tree: Arc<dyn ProjectTree>) -> LocalScheduler {
    init_logger();
    LocalScheduler::new(HashMap::new(), tasks, tree)
}

fn select(subject: Key, product: TypeId) -> Node {
    Node::Select(nodes::Select {
        subject,
        product,
        variants: Vec::new(),
        variant_key: None,
    })
}

fn int_list_root(product: TypeId) -> Node {
    Node::Dependencies(nodes::Dependencies {
        subject: Key::new(IntList {
            items: vec![1, 2, 3],
        }),
        product,
        variants: Vec::new(),
        dep_product: TypeId::of::<IntList>(),
        field: Some("items".to_owned()),
    })
}

fn request(roots: Vec<Node>) -> ExecutionRequest {
    ExecutionRequest { roots }
}

fn len_tasks() -> Tasks {
    let mut tasks = Tasks::new();
    tasks.add(
        "len",
        TypeId::of::<i64>(),
        vec![Selector::select(TypeId::of::<String>())],
        |args| {
            let s = args[0].downcast_ref::<String>().unwrap();
            Ok(Key::new(s.len() as i64))
        },
    );
    tasks
}

fn root_state(scheduler: &LocalScheduler, request: &ExecutionRequest) -> Complete {
    scheduler.root_entries(request)[0].1.clone().unwrap()
}

// Scenarios.

#[test]
fn trivial_success() {
    let scheduler = scheduler(len_tasks(), empty_tree());
    let root = select(Key::new("abcd".to_owned()), TypeId::of::<i64>());
    let request = request(vec![root.clone()]);

    scheduler.schedule(&request);

    assert_eq!(
        root_state(&scheduler, &request),
        Complete::Return(Key::new(4_i64)),
    );

    // The root Select, the Task that produced it, and the Select for the Task's clause.
    let walked = scheduler
        .graph()
        .walk(&[root], Direction::Outgoing, |_, _| true);
    assert_eq!(walked.len(), 3);
    assert!(walked
        .iter()
        .all(|&(_, ref state)| matches!(state, &Some(Complete::Return(_)))));
}

#[test]
fn root_entries_are_empty_before_execution() {
    let scheduler = scheduler(len_tasks(), empty_tree());
    let request = request(vec![select(Key::new("abcd".to_owned()), TypeId::of::<i64>())]);
    assert_eq!(scheduler.root_entries(&request)[0].1, None);
}

#[test]
fn self_cycle_is_localized() {
    let mut tasks = Tasks::new();
    // A task which would need its own output as input.
    tasks.add(
        "identity",
        TypeId::of::<Doubled>(),
        vec![Selector::select(TypeId::of::<Doubled>())],
        |mut args| Ok(args.remove(0)),
    );
    let scheduler = scheduler(tasks, empty_tree());
    let root = select(Key::new("x".to_owned()), TypeId::of::<Doubled>());
    let request = request(vec![root.clone()]);

    scheduler.schedule(&request);

    // The cycle manifests as a localized Noop rather than a deadlock.
    assert_eq!(
        root_state(&scheduler, &request),
        Complete::Noop(Noop::NoMatch),
    );

    // The task Node holds the rejected edge back to the root Select.
    let task_node = scheduler
        .graph()
        .dependencies_of(&root)
        .into_iter()
        .find(|node| matches!(node, &Node::Task(_)))
        .unwrap();
    assert_eq!(
        scheduler.graph().cyclic_dependencies_of(&task_node),
        vec![root.clone()],
    );
    assert_eq!(scheduler.graph().dependencies_of(&task_node), vec![]);
    assert!(matches!(
        scheduler.graph().state(&task_node),
        Some(Complete::Noop(Noop::MissingInput(_))),
    ));
}

#[test]
fn dependencies_aggregation() {
    let scheduler = scheduler(Tasks::new(), empty_tree());
    let root = int_list_root(TypeId::of::<i64>());
    let request = request(vec![root.clone()]);

    scheduler.schedule(&request);

    // The aggregated value preserves member order.
    let value = match root_state(&scheduler, &request) {
        Complete::Return(value) => value,
        state => panic!("Expected a Return: {:?}", state),
    };
    let members: Vec<i64> = value
        .downcast_ref::<Vec<Key>>()
        .unwrap()
        .iter()
        .map(|member| *member.downcast_ref::<i64>().unwrap())
        .collect();
    assert_eq!(members, vec![1, 2, 3]);

    // One Select for the dep product, plus one per member.
    let walked = scheduler
        .graph()
        .walk(&[root], Direction::Outgoing, |_, _| true);
    assert_eq!(walked.len(), 5);
    assert!(walked
        .iter()
        .all(|&(_, ref state)| matches!(state, &Some(Complete::Return(_)))));
}

#[test]
fn dependencies_propagate_throw() {
    let mut tasks = Tasks::new();
    tasks.add(
        "double",
        TypeId::of::<Doubled>(),
        vec![Selector::select(TypeId::of::<i64>())],
        |args| {
            let i = *args[0].downcast_ref::<i64>().unwrap();
            if i == 2 {
                Err("boom".to_owned())
            } else {
                Ok(Key::new(Doubled(i * 2)))
            }
        },
    );
    let scheduler = scheduler(tasks, empty_tree());
    let request = request(vec![int_list_root(TypeId::of::<Doubled>())]);

    scheduler.schedule(&request);

    assert_eq!(
        root_state(&scheduler, &request),
        Complete::Throw(Failure::Throw("boom".to_owned())),
    );

    // Sibling members are unaffected by the failing member.
    assert_eq!(
        scheduler
            .graph()
            .state(&select(Key::new(1_i64), TypeId::of::<Doubled>())),
        Some(Complete::Return(Key::new(Doubled(2)))),
    );
}

#[test]
fn dependencies_propagate_noop() {
    // No task produces Doubled, so each member Select is a Noop.
    let scheduler = scheduler(Tasks::new(), empty_tree());
    let request = request(vec![int_list_root(TypeId::of::<Doubled>())]);

    scheduler.schedule(&request);

    assert!(matches!(
        root_state(&scheduler, &request),
        Complete::Noop(Noop::MissingInput(_)),
    ));
}

#[test]
fn dependencies_unprojectable_field_throws() {
    let scheduler = scheduler(Tasks::new(), empty_tree());
    let root = Node::Dependencies(nodes::Dependencies {
        subject: Key::new(IntList { items: vec![1] }),
        product: TypeId::of::<i64>(),
        variants: Vec::new(),
        dep_product: TypeId::of::<IntList>(),
        field: Some("nonexistent".to_owned()),
    });
    let request = request(vec![root]);

    scheduler.schedule(&request);

    match root_state(&scheduler, &request) {
        Complete::Throw(Failure::Throw(msg)) => {
            assert!(msg.contains("no projectable collection"), "{}", msg)
        }
        state => panic!("Expected a Throw: {:?}", state),
    }
}

#[test]
fn ambiguous_tasks_throw() {
    let mut tasks = len_tasks();
    tasks.add(
        "len_again",
        TypeId::of::<i64>(),
        vec![Selector::select(TypeId::of::<String>())],
        |args| {
            let s = args[0].downcast_ref::<String>().unwrap();
            Ok(Key::new(s.len() as i64))
        },
    );
    let scheduler = scheduler(tasks, empty_tree());
    let request = request(vec![select(Key::new("abcd".to_owned()), TypeId::of::<i64>())]);

    scheduler.schedule(&request);

    match root_state(&scheduler, &request) {
        Complete::Throw(Failure::Ambiguous { subject, product }) => {
            assert_eq!(subject, Key::new("abcd".to_owned()));
            assert_eq!(product, TypeId::of::<i64>());
        }
        state => panic!("Expected an ambiguity: {:?}", state),
    }
}

#[test]
fn task_result_type_is_checked() {
    let mut tasks = Tasks::new();
    tasks.add(
        "lying_len",
        TypeId::of::<i64>(),
        vec![Selector::select(TypeId::of::<String>())],
        |_| Ok(Key::new("not an i64".to_owned())),
    );
    let scheduler = scheduler(tasks, empty_tree());
    let request = request(vec![select(Key::new("abcd".to_owned()), TypeId::of::<i64>())]);

    scheduler.schedule(&request);

    match root_state(&scheduler, &request) {
        Complete::Throw(Failure::Throw(msg)) => {
            assert!(msg.contains("returned a String rather than a i64"), "{}", msg)
        }
        state => panic!("Expected a Throw: {:?}", state),
    }
}

#[test]
fn select_literal_ignores_the_subject() {
    let scheduler = scheduler(Tasks::new(), empty_tree());
    let root = Node::create(
        Selector::SelectLiteral(SelectLiteral {
            subject: Key::new("literal".to_owned()),
            product: TypeId::of::<String>(),
        }),
        Key::new(42_i64),
        Vec::new(),
    );
    let request = request(vec![root]);

    scheduler.schedule(&request);

    assert_eq!(
        root_state(&scheduler, &request),
        Complete::Return(Key::new("literal".to_owned())),
    );
}

// Variants.

#[test]
fn select_variant_matches_by_name() {
    let scheduler = scheduler(Tasks::new(), empty_tree());
    let subject = Key::new(Named {
        name: "x86".to_owned(),
    });
    let root = Node::Select(nodes::Select {
        subject: subject.clone(),
        product: TypeId::of::<Named>(),
        variants: vec![("platform".to_owned(), "x86".to_owned())],
        variant_key: Some("platform".to_owned()),
    });
    let request = request(vec![root]);

    scheduler.schedule(&request);

    assert_eq!(root_state(&scheduler, &request), Complete::Return(subject));
}

#[test]
fn select_variant_unconfigured_key_is_noop() {
    let scheduler = scheduler(Tasks::new(), empty_tree());
    let root = Node::Select(nodes::Select {
        subject: Key::new(Named {
            name: "x86".to_owned(),
        }),
        product: TypeId::of::<Named>(),
        variants: Vec::new(),
        variant_key: Some("platform".to_owned()),
    });
    let request = request(vec![root]);

    scheduler.schedule(&request);

    assert_eq!(
        root_state(&scheduler, &request),
        Complete::Noop(Noop::NoVariant("platform".to_owned())),
    );
}

#[test]
fn select_variant_mismatch_is_no_match() {
    let scheduler = scheduler(Tasks::new(), empty_tree());
    let root = Node::Select(nodes::Select {
        subject: Key::new(Named {
            name: "x86".to_owned(),
        }),
        product: TypeId::of::<Named>(),
        variants: vec![("platform".to_owned(), "arm".to_owned())],
        variant_key: Some("platform".to_owned()),
    });
    let request = request(vec![root]);

    scheduler.schedule(&request);

    assert_eq!(
        root_state(&scheduler, &request),
        Complete::Noop(Noop::NoMatch),
    );
}

// Projection.

#[test]
fn projection_synthesises_a_subject() {
    let scheduler = scheduler(len_tasks(), empty_tree());
    let root = Node::create(
        Selector::SelectProjection(SelectProjection {
            product: TypeId::of::<i64>(),
            projected_subject: TypeId::of::<String>(),
            fields: vec!["value".to_owned()],
            input_product: TypeId::of::<Holder>(),
        }),
        Key::new(Holder {
            value: "abcd".to_owned(),
        }),
        Vec::new(),
    );
    let request = request(vec![root]);

    scheduler.schedule(&request);

    assert_eq!(
        root_state(&scheduler, &request),
        Complete::Return(Key::new(4_i64)),
    );
}

#[test]
fn projection_of_missing_field_throws() {
    let scheduler = scheduler(len_tasks(), empty_tree());
    let root = Node::create(
        Selector::SelectProjection(SelectProjection {
            product: TypeId::of::<i64>(),
            projected_subject: TypeId::of::<String>(),
            fields: vec!["nonexistent".to_owned()],
            input_product: TypeId::of::<Holder>(),
        }),
        Key::new(Holder {
            value: "abcd".to_owned(),
        }),
        Vec::new(),
    );
    let request = request(vec![root]);

    scheduler.schedule(&request);

    match root_state(&scheduler, &request) {
        Complete::Throw(Failure::Throw(msg)) => {
            assert!(msg.contains("no projectable field"), "{}", msg)
        }
        state => panic!("Expected a Throw: {:?}", state),
    }
}

// Filesystem.

fn content_tree() -> Arc<MemTree> {
    MemTree::new(vec![
        ("src/a.txt", b"one".as_slice()),
        ("src/b.txt", b"two".as_slice()),
    ])
}

#[test]
fn filesystem_reads_file_content() {
    let scheduler = scheduler(Tasks::new(), content_tree());
    let request = request(vec![select(
        Key::new(File(PathBuf::from("src/a.txt"))),
        TypeId::of::<FileContent>(),
    )]);

    scheduler.schedule(&request);

    assert_eq!(
        root_state(&scheduler, &request),
        Complete::Return(Key::new(FileContent {
            path: PathBuf::from("src/a.txt"),
            content: b"one".to_vec(),
        })),
    );
}

#[test]
fn filesystem_lists_directories() {
    let scheduler = scheduler(Tasks::new(), content_tree());
    let request = request(vec![select(
        Key::new(Dir(PathBuf::from("src"))),
        TypeId::of::<DirectoryListing>(),
    )]);

    scheduler.schedule(&request);

    assert_eq!(
        root_state(&scheduler, &request),
        Complete::Return(Key::new(DirectoryListing(vec![
            Stat::File(File(PathBuf::from("src/a.txt"))),
            Stat::File(File(PathBuf::from("src/b.txt"))),
        ]))),
    );
}

#[test]
fn path_globs_roots_expand_and_aggregate() {
    let scheduler = scheduler(Tasks::new(), content_tree());
    let request = LocalScheduler::execution_request(
        vec![TypeId::of::<FileContent>()],
        vec![Key::new(PathGlobs::create(vec!["src/*.txt".to_owned()]))],
    )
    .unwrap();

    scheduler.schedule(&request);

    let value = match root_state(&scheduler, &request) {
        Complete::Return(value) => value,
        state => panic!("Expected a Return: {:?}", state),
    };
    let contents: Vec<Vec<u8>> = value
        .downcast_ref::<Vec<Key>>()
        .unwrap()
        .iter()
        .map(|member| member.downcast_ref::<FileContent>().unwrap().content.clone())
        .collect();
    assert_eq!(contents, vec![b"one".to_vec(), b"two".to_vec()]);
}

#[test]
fn filesystem_invalidation_deletes_dependents() {
    let scheduler = scheduler(Tasks::new(), content_tree());
    let root_a = select(
        Key::new(File(PathBuf::from("src/a.txt"))),
        TypeId::of::<FileContent>(),
    );
    let root_b = select(
        Key::new(File(PathBuf::from("src/b.txt"))),
        TypeId::of::<FileContent>(),
    );
    let request = request(vec![root_a.clone(), root_b.clone()]);

    scheduler.schedule(&request);
    assert_eq!(scheduler.graph().len(), 4);

    // Invalidating one path deletes its Filesystem Node and the Select above it.
    assert_eq!(
        scheduler.invalidate_files(&[PathBuf::from("src/a.txt")]),
        2,
    );
    assert_eq!(scheduler.graph().len(), 2);
    assert_eq!(scheduler.graph().state(&root_a), None);
    assert!(matches!(
        scheduler.graph().state(&root_b),
        Some(Complete::Return(_)),
    ));

    // Invalidation is idempotent.
    assert_eq!(
        scheduler.invalidate_files(&[PathBuf::from("src/a.txt")]),
        0,
    );

    // Re-running the request rebuilds exactly the deleted subgraph.
    let stat = scheduler.schedule(&request);
    assert_eq!(scheduler.graph().len(), 4);
    assert!(matches!(
        scheduler.graph().state(&root_a),
        Some(Complete::Return(_)),
    ));
    // Three steps: the re-created root twice (Waiting, then Return), plus its
    // Filesystem Node. The unaffected root is not re-run.
    assert_eq!(stat.step_count, 3);
}

// The goal and spec surfaces.

#[test]
fn build_request_translates_goals() {
    let mut tasks = Tasks::new();
    tasks.add(
        "addresses",
        TypeId::of::<Addresses>(),
        vec![Selector::select(TypeId::of::<SiblingAddresses>())],
        |args| {
            let spec = args[0].downcast_ref::<SiblingAddresses>().unwrap();
            Ok(Key::new(Addresses(vec![
                Address {
                    spec_path: spec.directory.clone(),
                    name: "a".to_owned(),
                },
                Address {
                    spec_path: spec.directory.clone(),
                    name: "b".to_owned(),
                },
            ])))
        },
    );
    tasks.add(
        "label",
        TypeId::of::<Label>(),
        vec![Selector::select(TypeId::of::<Address>())],
        |args| {
            let address = args[0].downcast_ref::<Address>().unwrap();
            Ok(Key::new(Label(address.name.clone())))
        },
    );
    let scheduler = LocalScheduler::new(
        hashmap! {
            "list".to_owned() => TypeId::of::<Label>(),
        },
        tasks,
        empty_tree(),
    );

    let request = scheduler
        .build_request(
            &["list".to_owned()],
            vec![Key::new(SiblingAddresses {
                directory: PathBuf::from("src"),
            })],
        )
        .unwrap();
    assert!(matches!(request.roots[0], Node::Dependencies(_)));

    scheduler.schedule(&request);

    let value = match root_state(&scheduler, &request) {
        Complete::Return(value) => value,
        state => panic!("Expected a Return: {:?}", state),
    };
    let labels: Vec<Label> = value
        .downcast_ref::<Vec<Key>>()
        .unwrap()
        .iter()
        .map(|member| member.downcast_ref::<Label>().unwrap().clone())
        .collect();
    assert_eq!(labels, vec![Label("a".to_owned()), Label("b".to_owned())]);
}

#[test]
fn build_request_rejects_unknown_goals() {
    let scheduler = scheduler(Tasks::new(), empty_tree());
    let err = scheduler
        .build_request(&["compile".to_owned()], vec![])
        .unwrap_err();
    assert!(err.contains("Unknown goal"), "{}", err);
}

#[test]
fn execution_request_rejects_unknown_subject_kinds() {
    let err =
        LocalScheduler::execution_request(vec![TypeId::of::<i64>()], vec![Key::new(42_i64)])
            .unwrap_err();
    assert!(err.contains("Unsupported root subject type"), "{}", err);
}

#[test]
fn address_roots_select_directly() {
    let subject = Key::new(Address {
        spec_path: PathBuf::from("src"),
        name: "a".to_owned(),
    });
    let request =
        LocalScheduler::execution_request(vec![TypeId::of::<Label>()], vec![subject]).unwrap();
    assert!(matches!(request.roots[0], Node::Select(_)));
}

// Scheduler properties.

#[test]
fn at_most_one_step_is_outstanding_per_node() {
    let scheduler = scheduler(Tasks::new(), empty_tree());
    let request = request(vec![int_list_root(TypeId::of::<i64>())]);

    let mut execution = scheduler.execution(&request);
    let mut outstanding: HashSet<Node> = HashSet::new();
    let mut last_step_id = 0;
    while let Some(batch) = execution.next_batch() {
        for &(ref step, _) in &batch {
            assert!(
                outstanding.insert(step.node().clone()),
                "{} was emitted while a step for it was outstanding",
                step.node(),
            );
            assert!(step.step_id() > last_step_id);
            last_step_id = step.step_id();
        }
        for (step, promise) in batch {
            promise.complete(step.run());
            outstanding.remove(step.node());
        }
    }

    assert!(matches!(
        root_state(&scheduler, &request),
        Complete::Return(_),
    ));
}

#[test]
fn steps_may_execute_on_other_threads() {
    let scheduler = scheduler(len_tasks(), empty_tree());
    let request = request(vec![
        select(Key::new("abcd".to_owned()), TypeId::of::<i64>()),
        select(Key::new("ab".to_owned()), TypeId::of::<i64>()),
    ]);

    let mut execution = scheduler.execution(&request);
    while let Some(batch) = execution.next_batch() {
        std::thread::scope(|scope| {
            for &(ref step, ref promise) in &batch {
                scope.spawn(move || promise.complete(step.run()));
            }
        });
    }

    let entries = scheduler.root_entries(&request);
    assert_eq!(entries[0].1, Some(Complete::Return(Key::new(4_i64))));
    assert_eq!(entries[1].1, Some(Complete::Return(Key::new(2_i64))));
}

#[test]
fn waiting_on_already_complete_deps_advances_immediately() {
    let mut tasks = Tasks::new();
    tasks.add(
        "double",
        TypeId::of::<Doubled>(),
        vec![Selector::select(TypeId::of::<i64>())],
        |args| Ok(Key::new(Doubled(args[0].downcast_ref::<i64>().unwrap() * 2))),
    );
    tasks.add(
        "triple",
        TypeId::of::<Tripled>(),
        vec![Selector::select(TypeId::of::<i64>())],
        |args| Ok(Key::new(Tripled(args[0].downcast_ref::<i64>().unwrap() * 3))),
    );
    let scheduler = scheduler(tasks, empty_tree());

    let first = request(vec![select(Key::new(5_i64), TypeId::of::<Doubled>())]);
    scheduler.schedule(&first);
    assert_eq!(
        root_state(&scheduler, &first),
        Complete::Return(Key::new(Doubled(10))),
    );

    // The second request's task declares a dependency which is already complete: it
    // becomes a candidate again immediately, and completes without further Waiting.
    let second = request(vec![select(Key::new(5_i64), TypeId::of::<Tripled>())]);
    let stat = scheduler.schedule(&second);
    assert_eq!(
        root_state(&scheduler, &second),
        Complete::Return(Key::new(Tripled(15))),
    );
    assert_eq!(
        stat,
        ExecutionStat {
            step_count: 4,
            scheduling_iterations: 4,
        },
    );
}

#[test]
fn execution_is_deterministic() {
    let run = || {
        let scheduler = scheduler(len_tasks(), empty_tree());
        let request = request(vec![
            int_list_root(TypeId::of::<i64>()),
            select(Key::new("abcd".to_owned()), TypeId::of::<i64>()),
        ]);
        let stat = scheduler.schedule(&request);
        (
            scheduler.root_entries(&request),
            stat,
            scheduler.graph().len(),
        )
    };

    assert_eq!(run(), run());
}

// Visualization.

#[test]
fn visualizer_renders_reachable_nodes() {
    let scheduler = scheduler(len_tasks(), empty_tree());
    let root = select(Key::new("abcd".to_owned()), TypeId::of::<i64>());
    let request = request(vec![root.clone()]);
    scheduler.schedule(&request);

    let lines = crate::visualizer::render(scheduler.graph(), &request.roots);
    assert_eq!(lines.first().unwrap(), "digraph plans {");
    assert_eq!(lines.last().unwrap(), "}");
    assert!(lines.iter().any(|line| line.contains("Select(")));
    assert!(lines.iter().any(|line| line.contains("fillcolor")));

    let dir = tempfile::TempDir::new().unwrap();
    let path = dir.path().join("graph.dot");
    scheduler
        .visualize_graph_to_file(&request.roots, &path)
        .unwrap();
    let written = std::fs::read_to_string(&path).unwrap();
    assert_eq!(written.lines().count(), lines.len());
}

#[test]
fn visualizer_omits_noop_subgraphs() {
    let scheduler = scheduler(Tasks::new(), empty_tree());
    let root = select(Key::new("x".to_owned()), TypeId::of::<Doubled>());
    let request = request(vec![root]);
    scheduler.schedule(&request);

    // The root completed as a Noop, so only the preamble and closing brace render.
    let lines = crate::visualizer::render(scheduler.graph(), &request.roots);
    assert_eq!(lines.len(), 5);
}

#[test]
fn visualizer_colors_throws() {
    let mut tasks = Tasks::new();
    tasks.add(
        "explode",
        TypeId::of::<i64>(),
        vec![Selector::select(TypeId::of::<String>())],
        |_| Err("boom".to_owned()),
    );
    let scheduler = scheduler(tasks, empty_tree());
    let request = request(vec![select(Key::new("abcd".to_owned()), TypeId::of::<i64>())]);
    scheduler.schedule(&request);

    let lines = crate::visualizer::render(scheduler.graph(), &request.roots);
    assert!(lines.iter().any(|line| line.contains("tomato")));
}
