//! Properties of the plan projection: serialization, paths, hashing, and
//! mock-mode resolution.

use std::collections::HashMap;

use smithers::engine::ExecuteOptions;
use smithers::render::{dsl, render, Element, RenderScope, StateHandle};
use smithers::tree::{
    content_hash, generate_node_paths, node_path, serialize, NodeKind, Tree,
};

fn scope(frame: u32) -> RenderScope {
    RenderScope {
        frame,
        state: StateHandle::new().snapshot(),
    }
}

fn sample_workflow() -> Element {
    Element::fragment(vec![
        dsl::phase()
            .prop("name", "gather")
            .child(dsl::file().prop("path", "/tmp/notes.md").text("notes").build())
            .child(
                dsl::claude()
                    .prop("model", "claude-sonnet-4-5-20250929")
                    .child(
                        dsl::persona()
                            .prop("role", "researcher")
                            .text("Careful and thorough.")
                            .build(),
                    )
                    .text("Collect the facts.")
                    .build(),
            )
            .build(),
        dsl::subagent()
            .prop("parallel", true)
            .child(dsl::claude().text("angle one").build())
            .child(dsl::claude().text("angle two").build())
            .build(),
        dsl::stop().prop("reason", "single pass").build(),
    ])
}

/// Tags in pre-order, excluding ROOT and TEXT.
fn preorder_tags(tree: &Tree) -> Vec<&'static str> {
    tree.walk(tree.root())
        .into_iter()
        .map(|n| tree.get(n).kind)
        .filter(|k| !matches!(k, NodeKind::Root | NodeKind::Text))
        .map(|k| k.tag())
        .collect()
}

#[test]
fn serialization_preserves_the_element_token_sequence() {
    let mut tree = Tree::new();
    render(&mut tree, &sample_workflow(), &scope(0));

    let xml = serialize(&tree, tree.root());
    let expected = preorder_tags(&tree);

    // Opening tags appear in exactly pre-order, one per element node.
    let mut found = Vec::new();
    for raw_line in xml.lines() {
        let line = raw_line.trim_start();
        if let Some(rest) = line.strip_prefix('<')
            && !rest.starts_with('/')
        {
            let tag: String = rest
                .chars()
                .take_while(|c| c.is_ascii_alphanumeric() || *c == '-')
                .collect();
            found.push(tag);
        }
    }
    assert_eq!(found, expected);
}

#[test]
fn node_paths_are_stable_across_renders() {
    let workflow = sample_workflow();
    let mut tree = Tree::new();
    render(&mut tree, &workflow, &scope(0));
    let before: HashMap<String, _> = generate_node_paths(&tree, tree.root());

    render(&mut tree, &workflow, &scope(1));
    let after: HashMap<String, _> = generate_node_paths(&tree, tree.root());

    assert_eq!(before.len(), after.len());
    for (path, node) in &before {
        assert_eq!(after.get(path), Some(node), "path {path} moved");
    }
}

#[test]
fn node_paths_are_a_bijection() {
    let mut tree = Tree::new();
    render(&mut tree, &sample_workflow(), &scope(0));
    let paths = generate_node_paths(&tree, tree.root());

    let mut nodes: Vec<_> = paths.values().copied().collect();
    nodes.sort();
    nodes.dedup();
    assert_eq!(nodes.len(), paths.len(), "duplicate targets");

    for (path, node) in &paths {
        assert_eq!(&node_path(&tree, *node), path);
    }
}

#[test]
fn content_hash_is_stable_and_sensitive() {
    let workflow = sample_workflow();
    let mut tree_a = Tree::new();
    render(&mut tree_a, &workflow, &scope(0));
    let mut tree_b = Tree::new();
    render(&mut tree_b, &workflow, &scope(5));

    let paths_a = generate_node_paths(&tree_a, tree_a.root());
    let paths_b = generate_node_paths(&tree_b, tree_b.root());
    for (path, node_a) in &paths_a {
        let node_b = paths_b[path];
        assert_eq!(
            content_hash(&tree_a, *node_a),
            content_hash(&tree_b, node_b),
            "hash differs across identical renders at {path}"
        );
    }

    // Any prop change anywhere changes the ancestor chain's hashes.
    let claude = paths_a["ROOT/phase[0]/claude[0]"];
    let root_hash_before = content_hash(&tree_a, tree_a.root());
    let claude_hash_before = content_hash(&tree_a, claude);
    tree_a.get_mut(claude).props.set("maxTurns", 9i64);
    assert_ne!(content_hash(&tree_a, claude), claude_hash_before);
    assert_ne!(content_hash(&tree_a, tree_a.root()), root_hash_before);
}

#[test]
fn ampersand_is_never_double_encoded() {
    let mut tree = Tree::new();
    let mut raw = String::new();
    raw.push_str("a & b");
    raw.push_str(" < c > d \" e ' f");
    let element = dsl::human().prop("message", raw.as_str()).build();
    render(&mut tree, &element, &scope(0));

    let xml = serialize(&tree, tree.root());
    assert!(xml.contains("a &amp; b"));
    assert!(!xml.contains("&amp;amp;"));
    assert!(!xml.contains("&amp;lt;"));

    // Decoding the five entities in reverse order recovers the original.
    let attr = xml
        .split("message=\"")
        .nth(1)
        .and_then(|rest| rest.split('"').next())
        .unwrap();
    let decoded = attr
        .replace("&apos;", "'")
        .replace("&quot;", "\"")
        .replace("&gt;", ">")
        .replace("&lt;", "<")
        .replace("&amp;", "&");
    assert_eq!(decoded, raw);
}

#[test]
#[serial_test::serial]
fn explicit_mock_option_overrides_environment() {
    unsafe { std::env::set_var("SMITHERS_MOCK_MODE", "true") };
    let suppressed = ExecuteOptions {
        mock_mode: Some(false),
        ..Default::default()
    };
    assert!(!suppressed.resolve_mock(), "explicit false beats env true");

    let deferred = ExecuteOptions {
        mock_mode: None,
        ..Default::default()
    };
    assert!(deferred.resolve_mock(), "unset defers to env");

    unsafe { std::env::remove_var("SMITHERS_MOCK_MODE") };
    let enabled = ExecuteOptions {
        mock_mode: Some(true),
        ..Default::default()
    };
    assert!(enabled.resolve_mock(), "explicit true needs no env");
    let off = ExecuteOptions {
        mock_mode: None,
        ..Default::default()
    };
    assert!(!off.resolve_mock());
}
