use super::*;
use crate::metadata::MetadataStore;
use crate::models::{EntryStatus, EntryType};
use crate::notebook::{DirectBackend, NotebookAdapter};
use std::sync::Arc;
use tempfile::TempDir;

async fn service() -> (TempDir, EntryService) {
    let dir = TempDir::new().unwrap();
    let root = dir.path().to_path_buf();
    let adapter =
        NotebookAdapter::with_backend(Arc::new(DirectBackend::new(root.clone())), root);
    let metadata = MetadataStore::open_in_memory().await.unwrap();
    (dir, EntryService::new(adapter, metadata).unwrap())
}

fn plan_request(title: &str) -> CreateEntry {
    CreateEntry {
        entry_type: Some(EntryType::Plan),
        title: title.to_string(),
        content: "First paragraph.\n\n## Goals\n\nShip it.\n".to_string(),
        ..Default::default()
    }
}

#[tokio::test]
async fn create_then_recall_round_trip() {
    let (_dir, service) = service().await;
    let created = service.create(plan_request("Release plan")).await.unwrap();
    assert_eq!(created.path, format!("global/plan/{}-release-plan.md", created.id));
    assert_eq!(created.frontmatter.status, EntryStatus::Active);

    let recalled = service.recall(&created.id).await.unwrap();
    assert_eq!(recalled.frontmatter, created.frontmatter);
    assert_eq!(recalled.body, created.body);

    // Recall records an access.
    let meta = service.metadata().get(&created.id).await.unwrap().unwrap();
    assert_eq!(meta.access_count, 1);
}

#[tokio::test]
async fn create_task_in_project_defaults_to_draft() {
    let (_dir, service) = service().await;
    let created = service
        .create(CreateEntry {
            entry_type: Some(EntryType::Task),
            title: "Wire the codec".to_string(),
            project_id: Some("demo".to_string()),
            ..Default::default()
        })
        .await
        .unwrap();
    assert!(created.path.starts_with("projects/demo/task/"));
    assert_eq!(created.frontmatter.status, EntryStatus::Draft);
}

#[tokio::test]
async fn update_status_preserves_other_fields_byte_equivalent() {
    let (dir, service) = service().await;
    let mut request = plan_request("Stable plan");
    request.tags = vec!["keep".to_string()];
    let created = service.create(request).await.unwrap();
    let abs = dir.path().join(&created.path);
    let before = std::fs::read_to_string(&abs).unwrap();

    let updated = service
        .update(
            &created.id,
            UpdateEntry {
                status: Some(EntryStatus::InProgress),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(updated.frontmatter.status, EntryStatus::InProgress);

    let after = std::fs::read_to_string(&abs).unwrap();
    // Exactly one frontmatter line differs: the status field. The body
    // gains the dated footer.
    let changed: Vec<(&str, &str)> = before
        .lines()
        .zip(after.lines())
        .filter(|(b, a)| b != a)
        .collect();
    assert_eq!(changed, vec![("status: active", "status: in_progress")]);
    assert!(after.contains("*Status changed to in_progress on "));

    let recalled = service.recall(&created.id).await.unwrap();
    assert_eq!(recalled.frontmatter.status, EntryStatus::InProgress);
    assert_eq!(recalled.frontmatter.tags, vec!["keep".to_string()]);
}

#[tokio::test]
async fn update_note_appends_footer_with_note() {
    let (_dir, service) = service().await;
    let created = service.create(plan_request("Noted plan")).await.unwrap();
    let updated = service
        .update(
            &created.id,
            UpdateEntry {
                note: Some("waiting on review".to_string()),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert!(updated
        .body
        .contains(": waiting on review*"));
    assert!(updated.body.contains("*Status changed to active on "));
}

#[tokio::test]
async fn content_replacement_suppresses_footer() {
    let (_dir, service) = service().await;
    let created = service.create(plan_request("Replaced plan")).await.unwrap();
    let updated = service
        .update(
            &created.id,
            UpdateEntry {
                status: Some(EntryStatus::Completed),
                content: Some("New body.".to_string()),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(updated.body, "New body.\n");
    assert_eq!(updated.frontmatter.status, EntryStatus::Completed);
}

#[tokio::test]
async fn update_depends_on_rewrites_only_that_block() {
    let (_dir, service) = service().await;
    let created = service
        .create(CreateEntry {
            entry_type: Some(EntryType::Task),
            title: "Dependent".to_string(),
            project_id: Some("demo".to_string()),
            depends_on: vec!["aaaa1111".to_string()],
            ..Default::default()
        })
        .await
        .unwrap();

    let updated = service
        .update(
            &created.id,
            UpdateEntry {
                depends_on: Some(vec!["bbbb2222".to_string(), "cccc3333".to_string()]),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(
        updated.frontmatter.depends_on,
        vec!["bbbb2222".to_string(), "cccc3333".to_string()]
    );
    assert_eq!(updated.frontmatter.title, "Dependent");
}

#[tokio::test]
async fn empty_update_is_a_validation_error() {
    let (_dir, service) = service().await;
    let created = service.create(plan_request("Untouched")).await.unwrap();
    let err = service
        .update(&created.id, UpdateEntry::default())
        .await
        .unwrap_err();
    assert!(matches!(err, CortexError::Validation { .. }));
}

#[tokio::test]
async fn title_resolution_ambiguity_lists_suggestions() {
    let (_dir, service) = service().await;
    service.create(plan_request("Same title")).await.unwrap();
    let second = CreateEntry {
        entry_type: Some(EntryType::Idea),
        title: "Same title".to_string(),
        ..Default::default()
    };
    service.create(second).await.unwrap();

    let err = service.recall("Same title").await.unwrap_err();
    match err {
        CortexError::AmbiguousMatch { suggestions, .. } => {
            assert_eq!(suggestions.len(), 2);
            assert!(suggestions.iter().all(|s| s.title == "Same title"));
        }
        other => panic!("expected ambiguity, got {other:?}"),
    }
}

#[tokio::test]
async fn missing_entry_is_not_found() {
    let (_dir, service) = service().await;
    assert!(matches!(
        service.recall("zzzz9999").await.unwrap_err(),
        CortexError::NotFound(_)
    ));
    assert!(matches!(
        service.recall("No such title").await.unwrap_err(),
        CortexError::NotFound(_)
    ));
}

#[tokio::test]
async fn delete_requires_confirmation() {
    let (dir, service) = service().await;
    let created = service.create(plan_request("Doomed")).await.unwrap();
    let err = service.delete(&created.id, false).await.unwrap_err();
    assert!(matches!(err, CortexError::Validation { .. }));

    service.delete(&created.id, true).await.unwrap();
    assert!(!dir.path().join(&created.path).exists());
    assert!(service.metadata().get(&created.id).await.unwrap().is_none());
    assert!(matches!(
        service.recall(&created.id).await.unwrap_err(),
        CortexError::NotFound(_)
    ));
}

#[tokio::test]
async fn related_appendix_comments_out_unresolved_refs() {
    let (_dir, service) = service().await;
    let anchor = service.create(plan_request("Anchor")).await.unwrap();
    let created = service
        .create(CreateEntry {
            entry_type: Some(EntryType::Learning),
            title: "With relations".to_string(),
            related_entries: vec![anchor.id.clone(), "gone-ref".to_string()],
            ..Default::default()
        })
        .await
        .unwrap();

    assert!(created.body.contains("## Related Brain Entries"));
    assert!(created.body.contains(&format!("[Anchor]({})", anchor.path)));
    assert!(created.body.contains("<!-- unresolved: gone-ref -->"));
}

#[tokio::test]
async fn verify_bumps_last_verified() {
    let (_dir, service) = service().await;
    let created = service.create(plan_request("Verified")).await.unwrap();
    service.verify(&created.id).await.unwrap();
    let meta = service.metadata().get(&created.id).await.unwrap().unwrap();
    assert!(meta.last_verified.is_some());
}

#[tokio::test]
async fn generate_link_uses_title_and_path() {
    let (_dir, service) = service().await;
    let created = service.create(plan_request("Linkable")).await.unwrap();
    let link = service.generate_link("Linkable").await.unwrap();
    assert_eq!(link.link, format!("[Linkable]({})", created.path));
    assert_eq!(link.id, created.id);
}

#[tokio::test]
async fn list_paginates_and_filters() {
    let (_dir, service) = service().await;
    for i in 0..5 {
        service.create(plan_request(&format!("Plan {i}"))).await.unwrap();
    }
    service
        .create(CreateEntry {
            entry_type: Some(EntryType::Idea),
            title: "An idea".to_string(),
            ..Default::default()
        })
        .await
        .unwrap();

    let (page, total) = service
        .list(&ListQuery {
            entry_type: Some(EntryType::Plan),
            limit: 2,
            offset: 2,
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(total, 5);
    assert_eq!(page.len(), 2);

    let (all_global, _) = service
        .list(&ListQuery {
            global: Some(true),
            limit: 100,
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(all_global.len(), 6);
}

#[tokio::test]
async fn inject_degrades_without_rich_backend() {
    let (_dir, service) = service().await;
    service.create(plan_request("Context")).await.unwrap();
    let result = service.inject("anything", 5).await.unwrap();
    assert!(result.hits.is_empty());
    assert!(result.block.contains("Relevant Brain Context"));
    assert!(result.block.contains("unavailable"));
}

#[tokio::test]
async fn stats_count_types_and_statuses() {
    let (_dir, service) = service().await;
    service.create(plan_request("P1")).await.unwrap();
    service.create(plan_request("P2")).await.unwrap();
    let stats = service.stats().await.unwrap();
    assert_eq!(stats.total_entries, 2);
    assert_eq!(stats.by_type.get("plan"), Some(&2));
    assert_eq!(stats.by_status.get("active"), Some(&2));
}

#[tokio::test]
async fn sections_of_entry() {
    let (_dir, service) = service().await;
    let created = service.create(plan_request("Sectioned")).await.unwrap();
    let sections = service.sections(&created.id).await.unwrap();
    assert_eq!(sections.len(), 1);
    assert_eq!(sections[0].title, "Goals");

    let extracted = service.section(&created.id, "goals", true).await.unwrap();
    assert!(extracted.content.contains("Ship it."));

    let err = service.section(&created.id, "missing", true).await.unwrap_err();
    assert!(matches!(err, CortexError::NotFound(_)));
}
