//! Scanner cycles, the scheduler lifecycle and the service facade.

mod common;

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use common::{FlakyDirectory, MessageBuilder, TestHarness};
use crmlink::{
    Config, CrmLinkService, Folder, LinkError, LinkingEngine, MailStore, Message, MessageOptions,
    ScanCursor, ScannerSettings, SqliteMailStore,
};

fn settings() -> ScannerSettings {
    ScannerSettings {
        interval: Duration::from_millis(20),
        initial_delay: Duration::from_millis(0),
        grace_window: chrono::Duration::hours(1),
        batch_size: 100,
        folders: vec![Folder::Inbox, Folder::Sent],
    }
}

fn minutes_ago(minutes: i64) -> DateTime<Utc> {
    Utc::now() - chrono::Duration::minutes(minutes)
}

#[test]
fn batch_continues_past_a_failing_message_and_advances_watermark() {
    let harness = TestHarness::new();
    harness.activate_tenant(1);
    harness.add_contact(1, 4, &["b@y.com"]);
    for id in 1..=5 {
        let builder = MessageBuilder::new(id)
            .chain(&format!("c{}", id))
            .received_at(minutes_ago(30 - id));
        // Message 3's only participant is the address whose lookup fails.
        let message = if id == 3 {
            builder.from("boom@x.com").build()
        } else {
            builder.from(&format!("m{}@x.com", id)).to("b@y.com").build()
        };
        harness.insert_message(&message);
    }

    let directory = FlakyDirectory::new(harness.db.clone(), &["boom@x.com"]);
    let engine = TestHarness::engine_with_directory(&harness.db, directory.clone());
    let scanner = harness.scanner(engine, settings());
    let before = scanner.watermark();

    let report = scanner.run_cycle().expect("cycle should run");

    assert_eq!(report.counts.processed, 5);
    assert_eq!(report.counts.skipped, 1);
    assert_eq!(report.counts.linked, 4);
    assert!(directory.looked_up("m4@x.com"));
    assert!(directory.looked_up("m5@x.com"));
    assert!(!harness.history(1, 4).is_empty());
    assert!(!harness.history(1, 5).is_empty());
    assert!(harness.history(1, 3).is_empty());
    assert!(scanner.watermark() > before);
    assert!(scanner.watermark().received_at >= report.started_at);
}

#[test]
fn full_batch_of_skipped_messages_does_not_stall_the_tenant() {
    let harness = TestHarness::new();
    harness.activate_tenant(1);
    harness.add_contact(1, 4, &["b@y.com"]);
    let same_instant = minutes_ago(30);
    for id in 1..=3 {
        harness.insert_message(
            &MessageBuilder::new(id)
                .chain("")
                .from("b@y.com")
                .received_at(same_instant)
                .build(),
        );
    }
    harness.insert_message(
        &MessageBuilder::new(10)
            .chain("c10")
            .from("b@y.com")
            .received_at(same_instant + chrono::Duration::minutes(1))
            .build(),
    );

    let scanner = harness.scanner(
        harness.engine(),
        ScannerSettings {
            batch_size: 3,
            ..settings()
        },
    );

    let first = scanner.run_cycle().unwrap();
    assert_eq!(first.counts.processed, 3);
    assert_eq!(first.counts.skipped, 3);
    assert_eq!(first.watermark.message_id, 3);

    let second = scanner.run_cycle().unwrap();
    assert_eq!(second.counts.processed, 1);
    assert_eq!(second.counts.linked, 1);
    assert!(!harness.history(1, 10).is_empty());
    assert!(harness.history(1, 1).is_empty());
}

#[test]
fn candidates_exclude_other_folders_and_old_mail() {
    let harness = TestHarness::new();
    harness.activate_tenant(1);
    harness.insert_message(
        &MessageBuilder::new(1).chain("c1").from("a@x.com").received_at(minutes_ago(5)).build(),
    );
    harness.insert_message(
        &MessageBuilder::new(2)
            .chain("c2")
            .from("a@x.com")
            .folder(Folder::Spam)
            .received_at(minutes_ago(5))
            .build(),
    );
    harness.insert_message(
        &MessageBuilder::new(3).chain("c3").from("a@x.com").received_at(minutes_ago(600)).build(),
    );
    harness.insert_message(
        &MessageBuilder::new(4)
            .chain("c4")
            .from("a@x.com")
            .folder(Folder::Sent)
            .received_at(minutes_ago(5))
            .build(),
    );

    let scanner = harness.scanner(harness.engine(), settings());
    let report = scanner.run_cycle().unwrap();

    assert_eq!(report.counts.processed, 2);
    assert_eq!(report.counts.no_match, 2);
    assert!(harness.history(1, 2).is_empty());
    assert!(harness.history(1, 3).is_empty());
}

#[test]
fn inactive_tenants_are_not_scanned() {
    let harness = TestHarness::new();
    harness.activate_tenant(1);
    harness
        .db
        .with_conn(|conn| crmlink::db::mail_repo::upsert_tenant(conn, 2, 1))
        .unwrap();
    harness.insert_message(&MessageBuilder::new(1).from("a@x.com").build());
    harness.insert_message(&MessageBuilder::new(2).tenant(2).from("a@x.com").build());

    let scanner = harness.scanner(harness.engine(), settings());
    let report = scanner.run_cycle().unwrap();

    assert_eq!(report.tenants, 1);
    assert_eq!(report.counts.processed, 1);
    assert!(harness.history(2, 2).is_empty());
}

/// Mail store whose candidate query fails for one tenant.
struct BrokenTenant {
    inner: SqliteMailStore,
    broken: i64,
}

impl MailStore for BrokenTenant {
    fn find_candidate_messages(
        &self,
        tenant: i64,
        after: &ScanCursor,
        folders: &[Folder],
        limit: usize,
    ) -> Result<Vec<Message>, LinkError> {
        if tenant == self.broken {
            return Err(LinkError::MailStore("tenant shard offline".to_string()));
        }
        self.inner.find_candidate_messages(tenant, after, folders, limit)
    }

    fn get_message(&self, tenant: i64, message_id: i64) -> Result<Option<Message>, LinkError> {
        self.inner.get_message(tenant, message_id)
    }

    fn get_full_message(
        &self,
        tenant: i64,
        message_id: i64,
        options: MessageOptions,
    ) -> Result<Message, LinkError> {
        self.inner.get_full_message(tenant, message_id, options)
    }

    fn chain_messages(
        &self,
        tenant: i64,
        mailbox_id: i64,
        chain_id: &str,
    ) -> Result<Vec<Message>, LinkError> {
        self.inner.chain_messages(tenant, mailbox_id, chain_id)
    }

    fn active_tenants(&self) -> Result<Vec<i64>, LinkError> {
        self.inner.active_tenants()
    }
}

#[test]
fn one_failing_tenant_does_not_block_the_others() {
    let harness = TestHarness::new();
    harness.activate_tenant(1);
    harness.activate_tenant(2);
    harness.insert_message(&MessageBuilder::new(1).from("a@x.com").build());
    harness.insert_message(&MessageBuilder::new(2).tenant(2).chain("c2").from("a@x.com").build());

    let engine = LinkingEngine::new(
        crmlink::LinkStore::new(harness.db.clone()),
        Arc::new(BrokenTenant {
            inner: SqliteMailStore::new(harness.db.clone()),
            broken: 1,
        }),
        Arc::new(crmlink::SqliteContactDirectory::new(harness.db.clone())),
        crmlink::ActivityLog::default(),
    );
    let scanner = harness.scanner(engine, settings());
    let before = scanner.watermark();

    let report = scanner.run_cycle().unwrap();

    assert_eq!(report.failed_tenants, vec![1]);
    assert_eq!(report.counts.processed, 1);
    assert!(harness.history(2, 2)[0].is_tombstone());
    // The failed tenant's window is examined again next cycle.
    assert_eq!(scanner.watermark(), before);
}

#[test]
fn service_reports_and_lifecycle() {
    let harness = TestHarness::new();
    harness.activate_tenant(1);
    harness.add_contact(1, 4, &["b@y.com"]);
    harness.insert_message(&MessageBuilder::new(100).from("a@x.com").to("b@y.com").build());
    harness.insert_message(
        &MessageBuilder::new(200)
            .chain("c2")
            .from("a@x.com")
            .received_at(minutes_ago(180))
            .build(),
    );

    let mut config = Config::default();
    config.scanner.interval_secs = 1;
    config.scanner.initial_delay_secs = 0;
    let service = CrmLinkService::with_database(harness.second_handle(), &config);

    let report = service.process_message(1, 100);
    assert!(report.success);
    assert_eq!(report.contacts_linked, 1);
    assert_eq!(report.message_id, 100);

    let missing = service.process_message(1, 999);
    assert!(!missing.success);
    assert_eq!(missing.contacts_linked, 0);

    // Message 200 is older than the grace window; only the recent sweep sees it.
    let cycle = service.scan_now().unwrap();
    assert_eq!(cycle.counts.processed, 0);
    let recent = service.process_recent(1, 4);
    assert!(recent.success);
    assert_eq!(recent.counts.processed, 1);
    assert_eq!(recent.counts.no_match, 1);

    assert!(!service.status().running);
    assert!(service.start().unwrap());
    assert!(!service.start().unwrap());
    assert!(service.status().running);
    assert!(service.stop());
    assert!(!service.stop());

    let status = service.status();
    assert!(!status.running);
    assert!(!status.scanning);
    assert!(status.cycles_completed >= 1);
    assert!(status.last_cycle_completed_at.is_some());
}
