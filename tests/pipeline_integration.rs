//! End-to-end pipeline tests over real on-disk fixtures.

use std::path::Path;

use valknut::core::config::{Granularity, RootConfig, ValknutConfig};
use valknut::core::pipeline::{AnalysisInputs, Pipeline};
use valknut::detectors::clones::{CloneGroup, CloneMember};
use valknut::packs::ImpactPack;

fn config_for(dir: &Path) -> ValknutConfig {
    let mut config = ValknutConfig::default();
    config.roots = vec![RootConfig::new(dir)];
    config
}

fn write(dir: &Path, name: &str, content: &str) {
    std::fs::write(dir.join(name), content).unwrap();
}

#[tokio::test]
async fn import_cycle_is_detected_and_cut() {
    let dir = tempfile::tempdir().unwrap();
    // a -> b -> c -> a forms a three-file import cycle.
    write(dir.path(), "a.py", "from b import bee\n\ndef aye():\n    return bee()\n");
    write(dir.path(), "b.py", "from c import sea\n\ndef bee():\n    return sea()\n");
    write(dir.path(), "c.py", "from a import aye\n\ndef sea():\n    return 1\n");

    let mut config = config_for(dir.path());
    config.ranking.granularity = Granularity::File;
    let pipeline = Pipeline::new(config).unwrap();
    let result = pipeline.analyze(AnalysisInputs::default()).await.unwrap();

    // Every file participates in the cycle, with the SCC spanning the whole
    // graph.
    assert_eq!(result.ranked_entities.len(), 3);
    for ranked in &result.ranked_entities {
        assert_eq!(ranked.vector.get_feature("in_cycle"), Some(1.0));
        assert_eq!(ranked.vector.get_feature("cycle_size"), Some(1.0));
    }

    // The cycle cutter proposes removing one of the three files.
    let cycle_pack = result
        .impact_packs
        .iter()
        .find_map(|pack| match pack {
            ImpactPack::CycleCut(p) => Some(p),
            _ => None,
        })
        .expect("a cycle pack is synthesized");
    assert_eq!(cycle_pack.scc_members.len(), 3);
    assert_eq!(cycle_pack.cut_nodes.len(), 1);
    assert!(cycle_pack.scc_members.contains(&cycle_pack.cut_nodes[0]));
}

#[tokio::test]
async fn clone_groups_produce_clone_mass_and_packs() {
    let dir = tempfile::tempdir().unwrap();
    let body: String = (0..90)
        .map(|i| format!("    value_{i} = step_{i}()\n"))
        .collect();
    write(dir.path(), "one.py", &format!("def process_a():\n{body}"));
    write(dir.path(), "two.py", &format!("def process_b():\n{body}"));

    let one = dir.path().join("one.py").display().to_string();
    let two = dir.path().join("two.py").display().to_string();
    let clone_groups = vec![CloneGroup {
        similarity: 0.92,
        members: vec![
            CloneMember {
                entity_id: None,
                path: one,
                lines: "1-80".to_string(),
                similarity: 0.92,
            },
            CloneMember {
                entity_id: None,
                path: two,
                lines: "1-80".to_string(),
                similarity: 0.92,
            },
        ],
    }];

    let pipeline = Pipeline::new(config_for(dir.path())).unwrap();
    let result = pipeline
        .analyze(AnalysisInputs { clone_groups })
        .await
        .unwrap();

    // Function entities overlap the clone spans.
    let with_mass = result
        .feature_vectors
        .iter()
        .filter(|v| v.get_feature("clone_mass").unwrap_or(0.0) > 0.0)
        .count();
    assert_eq!(with_mass, 2);

    // Clone pack metrics: 160 duplicated lines, capped score drop of 0.16,
    // and a target in the members' common ancestor directory.
    let clone_pack = result
        .impact_packs
        .iter()
        .find_map(|pack| match pack {
            ImpactPack::CloneConsolidation(p) => Some(p),
            _ => None,
        })
        .expect("a clone pack is synthesized");
    assert_eq!(clone_pack.value.dup_loc_removed, Some(160));
    let drop = clone_pack.value.score_drop_estimate.unwrap();
    assert!((drop - 0.16).abs() < 1e-9);
    assert!(clone_pack
        .suggested_target
        .path
        .starts_with(&dir.path().display().to_string()));
}

#[tokio::test]
async fn rankings_are_ordered_and_bounded() {
    let dir = tempfile::tempdir().unwrap();
    write(
        dir.path(),
        "simple.py",
        "def simple():\n    return 1\n",
    );
    write(
        dir.path(),
        "gnarly.py",
        "def gnarly(a, b, c, d, e):\n    if a and b:\n        for i in range(10):\n            if c:\n                while d:\n                    if e:\n                        a += 1\n    return a\n",
    );

    let mut config = config_for(dir.path());
    config.ranking.top_k = 1;
    let pipeline = Pipeline::new(config).unwrap();
    let result = pipeline.analyze(AnalysisInputs::default()).await.unwrap();

    // Descending scores.
    for window in result.ranked_entities.windows(2) {
        assert!(window[0].score >= window[1].score);
    }

    // The complex function outranks the trivial one.
    assert!(result.ranked_entities[0].entity_id.contains("gnarly"));

    // top_k slices the ranking; normalized features stay in [0, 1].
    assert_eq!(result.top_k_entities().len(), 1);
    for vector in &result.feature_vectors {
        for (name, value) in &vector.normalized_features {
            assert!(
                (0.0..=1.0).contains(value),
                "feature {name} out of bounds: {value}"
            );
        }
    }
}

#[tokio::test]
async fn coverage_report_feeds_entity_features() {
    let dir = tempfile::tempdir().unwrap();
    write(
        dir.path(),
        "lib.py",
        "def covered():\n    return 1\n\ndef uncovered():\n    return 2\n",
    );
    let lib = dir.path().join("lib.py").display().to_string();
    let report_path = dir.path().join("coverage.info");
    std::fs::write(
        &report_path,
        format!("SF:{lib}\nDA:1,3\nDA:2,3\nDA:4,0\nDA:5,0\nend_of_record\n"),
    )
    .unwrap();

    let mut config = config_for(dir.path());
    config.coverage.report_path = Some(report_path);
    let pipeline = Pipeline::new(config).unwrap();
    let result = pipeline.analyze(AnalysisInputs::default()).await.unwrap();

    let covered = result
        .feature_vectors
        .iter()
        .find(|v| v.entity_id.contains("covered") && !v.entity_id.contains("uncovered"))
        .unwrap();
    assert_eq!(covered.get_feature("coverage_percentage"), Some(100.0));

    let uncovered = result
        .feature_vectors
        .iter()
        .find(|v| v.entity_id.contains("uncovered"))
        .unwrap();
    assert_eq!(uncovered.get_feature("coverage_percentage"), Some(0.0));
    assert!(uncovered.get_feature("coverage_priority_score").unwrap() > 0.0);
}

#[tokio::test]
async fn mixed_language_corpus_analyzes_all_enabled_languages() {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "app.py", "def hello():\n    return 'hi'\n");
    write(dir.path(), "lib.rs", "fn hello() -> &'static str {\n    \"hi\"\n}\n");
    write(dir.path(), "main.go", "package main\n\nfunc hello() string {\n\treturn \"hi\"\n}\n");
    write(dir.path(), "index.ts", "function hello(): string {\n  return 'hi';\n}\n");

    let pipeline = Pipeline::new(config_for(dir.path())).unwrap();
    let result = pipeline.analyze(AnalysisInputs::default()).await.unwrap();

    assert_eq!(result.total_files, 4);
    let languages: std::collections::BTreeSet<&str> = result
        .feature_vectors
        .iter()
        .map(|v| v.entity_id.split("://").next().unwrap())
        .collect();
    // Auto granularity: function-level for python/ts, file-level for rust/go.
    assert!(languages.contains("python"));
    assert!(languages.contains("typescript"));
    assert!(languages.contains("rust"));
    assert!(languages.contains("go"));
}

#[tokio::test]
async fn non_overlap_drops_lower_ranked_overlapping_packs() {
    let dir = tempfile::tempdir().unwrap();
    let body: String = (0..90)
        .map(|i| format!("    value_{i} = step_{i}()\n"))
        .collect();
    write(dir.path(), "one.py", &format!("def process_a():\n{body}"));
    write(dir.path(), "two.py", &format!("def process_b():\n{body}"));

    let member = |path: &Path, lines: &str, similarity: f64| CloneMember {
        entity_id: Some(format!("python://{}::f", path.display())),
        path: path.display().to_string(),
        lines: lines.to_string(),
        similarity,
    };
    let one = dir.path().join("one.py");
    let two = dir.path().join("two.py");

    // Both groups claim the same entity in one.py; the second has a far
    // better value/effort ratio because it removes more duplication.
    let clone_groups = vec![
        CloneGroup {
            similarity: 0.86,
            members: vec![member(&one, "1-40", 0.86), member(&two, "1-40", 0.86)],
        },
        CloneGroup {
            similarity: 0.95,
            members: vec![member(&one, "1-80", 0.95), member(&two, "1-80", 0.95)],
        },
    ];

    let pipeline = Pipeline::new(config_for(dir.path())).unwrap();
    let result = pipeline
        .analyze(AnalysisInputs { clone_groups })
        .await
        .unwrap();

    let clone_packs: Vec<_> = result
        .impact_packs
        .iter()
        .filter_map(|pack| match pack {
            ImpactPack::CloneConsolidation(p) => Some(p),
            _ => None,
        })
        .collect();
    assert_eq!(clone_packs.len(), 1, "overlapping pack must be dropped");
    assert_eq!(clone_packs[0].value.dup_loc_removed, Some(160));

    // No two selected packs share an entity.
    let mut claimed = std::collections::BTreeSet::new();
    for pack in &result.impact_packs {
        for id in pack.entity_ids() {
            assert!(claimed.insert(id), "entity claimed twice");
        }
    }
}

#[tokio::test]
async fn huge_skewed_directory_yields_structure_packs() {
    let dir = tempfile::tempdir().unwrap();
    let pkg = dir.path().join("pkg");
    std::fs::create_dir_all(&pkg).unwrap();

    // 39 small files with clusterable names plus one enormous file.
    for i in 0..13 {
        write(&pkg, &format!("handler_{i:02}.py"), "def handle():\n    return 1\n");
        write(&pkg, &format!("model_{i:02}.py"), "def load():\n    return 1\n");
        write(&pkg, &format!("util_{i:02}.py"), "def fmt():\n    return 1\n");
    }
    let giant: String = (0..5)
        .map(|i| {
            format!(
                "def giant_service_{i}():\n{}",
                (0..300)
                    .map(|j| format!("    v{j} = {j}\n"))
                    .collect::<String>()
            )
        })
        .collect();
    write(&pkg, "mega.py", &giant);

    let mut config = config_for(dir.path());
    config.ranking.granularity = Granularity::File;
    config.impact_packs.non_overlap = false;
    let pipeline = Pipeline::new(config).unwrap();
    let result = pipeline.analyze(AnalysisInputs::default()).await.unwrap();

    let has_branch_reorg = result
        .impact_packs
        .iter()
        .any(|p| matches!(p, ImpactPack::BranchReorg(reorg) if (2..=4).contains(&reorg.proposal.len())));
    assert!(has_branch_reorg, "expected a branch reorg pack");

    let file_split = result
        .impact_packs
        .iter()
        .find_map(|p| match p {
            ImpactPack::FileSplit(split) => Some(split),
            _ => None,
        })
        .expect("expected a file split pack for mega.py");
    assert!(file_split.file.ends_with("mega.py"));
    assert!(!file_split.suggested_splits.is_empty());
}

#[tokio::test]
async fn constant_feature_corpus_still_ranks_deterministically() {
    let dir = tempfile::tempdir().unwrap();
    // Five structurally identical functions: complexity features all match.
    for i in 0..5 {
        write(
            dir.path(),
            &format!("same_{i}.py"),
            &format!("def same_{i}(x):\n    if x:\n        return {i}\n    return 0\n"),
        );
    }

    let run = || async {
        let pipeline = Pipeline::new(config_for(dir.path())).unwrap();
        pipeline.analyze(AnalysisInputs::default()).await.unwrap()
    };
    let first = run().await;
    let second = run().await;

    let order = |result: &valknut::PipelineResult| {
        result
            .ranked_entities
            .iter()
            .map(|r| r.entity_id.clone())
            .collect::<Vec<_>>()
    };
    assert_eq!(order(&first), order(&second));

    // Cyclomatic is constant across the corpus; the Bayesian fallback keeps
    // the normalized values inside [0, 1] without collapsing them all to one
    // value.
    let normalized: Vec<f64> = first
        .feature_vectors
        .iter()
        .map(|v| v.get_normalized("cyclomatic").unwrap())
        .collect();
    assert!(normalized.iter().all(|v| (0.0..=1.0).contains(v)));
    let head = normalized[0];
    assert!(normalized.iter().any(|v| (v - head).abs() > 1e-12));
}
