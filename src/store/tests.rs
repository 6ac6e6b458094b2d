//
// mailstore - account store tests
//
// Copyright 2026 mailstore contributors
//
// This file is part of mailstore.
//
// mailstore is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// mailstore is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with mailstore. If not, see <http://www.gnu.org/licenses/>.
//
// SPDX-License-Identifier: GPL-3.0-or-later

use std::{collections::BTreeMap, sync::Arc};

use super::*;
use crate::folder::{is_inbox_name, FolderAttributes, CANONICAL_INBOX};

fn new_store(name: &str) -> AccountStore {
    let info = AccountInfo {
        name: name.to_string().into(),
        primary_email: "bob@x.org".to_string(),
    };
    AccountStore::new(info, StoreEventConsumer::new(Arc::new(|_, _| {})))
}

fn path(s: &str) -> FolderPath {
    s.parse().unwrap()
}

fn message(message_id: &str, subject: &str, body: &str, date: UnixTimestamp) -> Message {
    Message {
        message_id: message_id.to_string(),
        in_reply_to: String::new(),
        internal_date: date,
        subject: subject.to_string(),
        from_field: "alice@example.com".to_string(),
        receivers: "bob@x.org".to_string(),
        cc: String::new(),
        bcc: String::new(),
        body: body.to_string(),
        flags: MessageFlags::empty(),
        fields: MessageFields::INDEXABLE | MessageFields::FLAGS,
        ..Message::default()
    }
}

#[test]
fn test_store_lifecycle() {
    smol::block_on(async {
        let tempdir = tempfile::tempdir().unwrap();
        let store = new_store("lifecycle");
        assert!(!store.is_open());
        let err = store.list_folders(None).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::NotOpen);

        store
            .open(Some(tempdir.path().to_path_buf()), None)
            .await
            .unwrap();
        assert!(store.is_open());
        let err = store
            .open(Some(tempdir.path().to_path_buf()), None)
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::AlreadyOpen);
        assert!(store.outbox().is_some());
        assert!(store.search_folder().is_some());

        store.close().await.unwrap();
        assert!(!store.is_open());
        assert!(store.outbox().is_none());
        // Idempotent.
        store.close().await.unwrap();

        store
            .open(Some(tempdir.path().to_path_buf()), None)
            .await
            .unwrap();
        store.close().await.unwrap();
        _ = tempdir.close();
    });
}

#[test]
fn test_duplicate_inbox_cleanup_on_open() {
    smol::block_on(async {
        let tempdir = tempfile::tempdir().unwrap();
        let store = new_store("inbox-cleanup");
        store
            .open(Some(tempdir.path().to_path_buf()), None)
            .await
            .unwrap();
        for name in ["INBOX", "Inbox", "inbox"] {
            store
                .clone_folder(&ImapFolder::new(path(name)), None)
                .await
                .unwrap();
        }
        let id = store
            .store_message(&path("Inbox"), &message("<a@x>", "hi", "hello", 1), None)
            .await
            .unwrap();
        store.close().await.unwrap();

        store
            .open(Some(tempdir.path().to_path_buf()), None)
            .await
            .unwrap();
        let folders = store.list_folders(None).await.unwrap();
        let inboxes: Vec<String> = folders
            .iter()
            .map(|(p, _)| p.to_string())
            .filter(|name| is_inbox_name(name))
            .collect();
        assert_eq!(inboxes, vec![CANONICAL_INBOX.to_string()]);
        // The variant's location rows are gone too; the message is now an
        // orphan.
        let results = store
            .search_message_id("<a@x>", MessageFields::empty(), true, &[], None, None)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].0.id, id);
        assert_eq!(results[0].1, None);
        store.close().await.unwrap();
        _ = tempdir.close();
    });
}

#[test]
fn test_clone_folder_creates_hierarchy() {
    smol::block_on(async {
        let tempdir = tempfile::tempdir().unwrap();
        let store = new_store("hierarchy");
        store
            .open(Some(tempdir.path().to_path_buf()), None)
            .await
            .unwrap();
        let leaf = store
            .clone_folder(&ImapFolder::new(path("A/B/C")), None)
            .await
            .unwrap();
        let folders = store.list_folders(None).await.unwrap();
        let paths: Vec<String> = folders.iter().map(|(p, _)| p.to_string()).collect();
        assert_eq!(paths, vec!["A", "A/B", "A/B/C"]);
        let handle = store.local_folder(&path("A/B/C"), None).await.unwrap();
        assert_eq!(handle.id(), leaf);

        // Reconcile some state, then re-clone with a conflicting
        // descriptor: ancestor creation collapses with the existing rows
        // and the existing leaf is returned untouched. STATUS and
        // SELECT/EXAMINE own its fields from then on.
        let mut status = ImapFolder::new(path("A/B/C"));
        status.status_messages = 12;
        status.email_unread = 3;
        store
            .update_folder_status(&status, false, None)
            .await
            .unwrap();
        let mut stale = ImapFolder::new(path("A/B/C"));
        stale.status_messages = 99;
        stale.select_examine_messages = 99;
        let again = store.clone_folder(&stale, None).await.unwrap();
        assert_eq!(leaf, again);
        assert_eq!(store.list_folders(None).await.unwrap().len(), 3);
        let properties = store
            .list_folders(None)
            .await
            .unwrap()
            .into_iter()
            .find(|(p, _)| p.to_string() == "A/B/C")
            .unwrap()
            .1;
        assert_eq!(properties.status_total, 12);
        assert_eq!(properties.unread_count, 3);
        assert_eq!(properties.select_examine_total, 0);
        store.close().await.unwrap();
        _ = tempdir.close();
    });
}

#[test]
fn test_delete_folder_refuses_children() {
    smol::block_on(async {
        let tempdir = tempfile::tempdir().unwrap();
        let store = new_store("delete");
        store
            .open(Some(tempdir.path().to_path_buf()), None)
            .await
            .unwrap();
        store
            .clone_folder(&ImapFolder::new(path("A/B")), None)
            .await
            .unwrap();
        assert!(!store.delete_folder(&path("A"), None).await.unwrap());
        assert_eq!(store.list_folders(None).await.unwrap().len(), 2);
        assert!(store.delete_folder(&path("A/B"), None).await.unwrap());
        assert!(store.delete_folder(&path("A"), None).await.unwrap());
        assert!(store.list_folders(None).await.unwrap().is_empty());
        assert!(!store.delete_folder(&path("Missing"), None).await.unwrap());
        store.close().await.unwrap();
        _ = tempdir.close();
    });
}

#[test]
fn test_status_select_examine_split() {
    smol::block_on(async {
        let tempdir = tempfile::tempdir().unwrap();
        let store = new_store("reconcile");
        store
            .open(Some(tempdir.path().to_path_buf()), None)
            .await
            .unwrap();
        store
            .clone_folder(&ImapFolder::new(path("INBOX")), None)
            .await
            .unwrap();
        let handle = store.local_folder(&path("INBOX"), None).await.unwrap();

        let mut status = ImapFolder::new(path("INBOX"));
        status.status_messages = 12;
        status.email_unread = 3;
        status.uid_validity = Some(99);
        status.uid_next = Some(100);
        status.attributes = FolderAttributes::MARKED;
        store
            .update_folder_status(&status, false, None)
            .await
            .unwrap();
        let properties = handle.properties();
        assert_eq!(properties.status_total, 12);
        assert_eq!(properties.unread_count, 3);
        assert_eq!(properties.attributes, FolderAttributes::MARKED);
        // update_uid_info unset: the UID markers and the SELECT total are
        // untouched.
        assert_eq!(properties.uid_validity, None);
        assert_eq!(properties.uid_next, None);
        assert_eq!(properties.select_examine_total, 0);
        // Never selected yet, so STATUS supplies the best known count.
        assert_eq!(properties.message_count(), 12);

        store
            .update_folder_status(&status, true, None)
            .await
            .unwrap();
        assert_eq!(handle.properties().uid_validity, Some(99));
        assert_eq!(handle.properties().uid_next, Some(100));

        let mut selected = ImapFolder::new(path("INBOX"));
        selected.select_examine_messages = 14;
        selected.uid_validity = Some(99);
        selected.uid_next = Some(101);
        store
            .update_folder_select_examine(&selected, None)
            .await
            .unwrap();
        let properties = handle.properties();
        assert_eq!(properties.select_examine_total, 14);
        assert_eq!(properties.uid_next, Some(101));
        // SELECT/EXAMINE never touches the STATUS observation.
        assert_eq!(properties.status_total, 12);
        assert_eq!(properties.message_count(), 14);

        let missing = ImapFolder::new(path("Missing"));
        let err = store
            .update_folder_status(&missing, false, None)
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::NotFound);
        store.close().await.unwrap();
        _ = tempdir.close();
    });
}

#[test]
fn test_local_folder_handles_are_shared_and_evicted() {
    smol::block_on(async {
        let tempdir = tempfile::tempdir().unwrap();
        let store = new_store("handles");
        store
            .open(Some(tempdir.path().to_path_buf()), None)
            .await
            .unwrap();
        store
            .clone_folder(&ImapFolder::new(path("Sent")), None)
            .await
            .unwrap();
        let a = store.local_folder(&path("Sent"), None).await.unwrap();
        let b = store.local_folder(&path("Sent"), None).await.unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        drop(a);
        assert!(store.get_local_folder(&path("Sent")).is_some());
        drop(b);
        assert!(store.get_local_folder(&path("Sent")).is_none());
        let err = store
            .local_folder(&path("Missing"), None)
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::NotFound);
        store.close().await.unwrap();
        _ = tempdir.close();
    });
}

#[test]
fn test_search_message_id_multimap() {
    smol::block_on(async {
        let tempdir = tempfile::tempdir().unwrap();
        let store = new_store("message-id");
        store
            .open(Some(tempdir.path().to_path_buf()), None)
            .await
            .unwrap();
        let id = store
            .store_message(
                &path("INBOX"),
                &message("<m1@x>", "taxes", "about 2024 taxes", 10),
                None,
            )
            .await
            .unwrap();
        store.link_message(&path("All Mail"), id, None).await.unwrap();
        let mut reply = message("<m2@x>", "Re: taxes", "replying", 11);
        reply.in_reply_to = "<m1@x>".to_string();
        store
            .store_message(&path("INBOX"), &reply, None)
            .await
            .unwrap();

        // Both the message and its reply match, each mapped to its
        // containing folders.
        let results = store
            .search_message_id("<m1@x>", MessageFields::empty(), true, &[], None, None)
            .await
            .unwrap()
            .unwrap();
        let mut pairs: Vec<(String, Option<String>)> = results
            .iter()
            .map(|(m, p)| (m.message_id.clone(), p.as_ref().map(ToString::to_string)))
            .collect();
        pairs.sort();
        assert_eq!(
            pairs,
            vec![
                ("<m1@x>".to_string(), Some("All Mail".to_string())),
                ("<m1@x>".to_string(), Some("INBOX".to_string())),
                ("<m2@x>".to_string(), Some("INBOX".to_string())),
            ]
        );

        // Any folder-blacklist hit suppresses the whole message, not just
        // that mapping.
        let results = store
            .search_message_id(
                "<m1@x>",
                MessageFields::empty(),
                true,
                &[Some(path("All Mail"))],
                None,
                None,
            )
            .await
            .unwrap()
            .unwrap();
        assert!(results.iter().all(|(m, _)| m.message_id == "<m2@x>"));

        // Flag blacklist removes the message entirely.
        let mut flagged = message("<m3@x>", "secret", "draft", 12);
        flagged.flags = MessageFlags::DRAFT;
        store
            .store_message(&path("INBOX"), &flagged, None)
            .await
            .unwrap();
        let results = store
            .search_message_id(
                "<m3@x>",
                MessageFields::empty(),
                true,
                &[],
                Some(MessageFlags::DRAFT | MessageFlags::DELETED),
                None,
            )
            .await
            .unwrap();
        assert!(results.is_none());
        store.close().await.unwrap();
        _ = tempdir.close();
    });
}

#[test]
fn test_search_message_id_orphans_and_required_fields() {
    smol::block_on(async {
        let tempdir = tempfile::tempdir().unwrap();
        let store = new_store("orphans");
        store
            .open(Some(tempdir.path().to_path_buf()), None)
            .await
            .unwrap();
        let id = store
            .store_message(&path("Tmp"), &message("<o@x>", "s", "b", 5), None)
            .await
            .unwrap();
        // Deleting the only containing folder orphans the message.
        assert!(store.delete_folder(&path("Tmp"), None).await.unwrap());
        let results = store
            .search_message_id("<o@x>", MessageFields::empty(), true, &[], None, None)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(results, vec![(results[0].0.clone(), None)]);

        // The null sentinel in the blacklist excludes orphans.
        let results = store
            .search_message_id("<o@x>", MessageFields::empty(), true, &[None], None, None)
            .await
            .unwrap();
        assert!(results.is_none());

        // Not partial_ok plus unsatisfied required fields skips the row.
        let results = store
            .search_message_id(
                "<o@x>",
                MessageFields::INDEXABLE | MessageFields::IN_REPLY_TO,
                false,
                &[],
                None,
                None,
            )
            .await
            .unwrap();
        assert!(results.is_none());

        let err = store
            .get_message(id, MessageFields::IN_REPLY_TO, None)
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::IncompleteMessage);
        store.close().await.unwrap();
        _ = tempdir.close();
    });
}

#[test]
fn test_search_end_to_end() {
    smol::block_on(async {
        let tempdir = tempfile::tempdir().unwrap();
        let store = new_store("search");
        store
            .open(Some(tempdir.path().to_path_buf()), None)
            .await
            .unwrap();
        let m1 = store
            .store_message(
                &path("INBOX"),
                &message("<t1@x>", "taxes", "the 2024 filing", 100),
                None,
            )
            .await
            .unwrap();
        let m2 = store
            .store_message(
                &path("INBOX"),
                &message("<t2@x>", "taxes again", "2024 numbers", 200),
                None,
            )
            .await
            .unwrap();
        store
            .store_message(
                &path("Spam"),
                &message("<t3@x>", "taxes", "2024 offer", 300),
                None,
            )
            .await
            .unwrap();
        // Index everything that is missing from the search table.
        while store.populate_index_batch(100, None).await.unwrap() == 100 {}

        let results = store
            .search(
                "from:alice@example.com subject:taxes 2024",
                0,
                0,
                &[],
                None,
                None,
            )
            .await
            .unwrap()
            .unwrap();
        // Newest first.
        assert_eq!(results.len(), 3);
        assert!(results
            .windows(2)
            .all(|w| w[0].internal_date >= w[1].internal_date));

        // Folder blacklist.
        let results = store
            .search(
                "from:alice@example.com subject:taxes 2024",
                0,
                0,
                &[Some(path("Spam"))],
                None,
                None,
            )
            .await
            .unwrap()
            .unwrap();
        assert_eq!(
            results.iter().map(|r| r.id).collect::<Vec<_>>(),
            vec![m2, m1]
        );

        // Pagination, with limit == 0 meaning "no limit" above.
        let page = store
            .search("taxes", 1, 1, &[], None, None)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(page.len(), 1);
        assert_eq!(page[0].id, m2);

        // Restriction to an id set.
        let results = store
            .search("taxes", 0, 0, &[], Some(&[m1]), None)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].id, m1);

        // "me" expansion reaches the receivers column.
        let results = store
            .search("to:me filing", 0, 0, &[], None, None)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].id, m1);

        // A query of stop-tokens only compiles to nothing.
        assert!(store
            .search("and or not", 0, 0, &[], None, None)
            .await
            .unwrap()
            .is_none());
        // No hits at all.
        assert!(store
            .search("zebra", 0, 0, &[], None, None)
            .await
            .unwrap()
            .is_none());
        store.close().await.unwrap();
        _ = tempdir.close();
    });
}

#[test]
fn test_search_folderless_blacklist() {
    smol::block_on(async {
        let tempdir = tempfile::tempdir().unwrap();
        let store = new_store("folderless");
        store
            .open(Some(tempdir.path().to_path_buf()), None)
            .await
            .unwrap();
        store
            .store_message(&path("Tmp"), &message("<f@x>", "hello", "world", 1), None)
            .await
            .unwrap();
        assert!(store.delete_folder(&path("Tmp"), None).await.unwrap());
        while store.populate_index_batch(100, None).await.unwrap() == 100 {}

        assert!(store
            .search("hello", 0, 0, &[], None, None)
            .await
            .unwrap()
            .is_some());
        // The orphan is excluded when "folderless" is blacklisted.
        assert!(store
            .search("hello", 0, 0, &[None], None, None)
            .await
            .unwrap()
            .is_none());
        store.close().await.unwrap();
        _ = tempdir.close();
    });
}

#[test]
fn test_blacklist_resolution_creates_folder_rows() {
    smol::block_on(async {
        let tempdir = tempfile::tempdir().unwrap();
        let store = new_store("blacklist-create");
        store
            .open(Some(tempdir.path().to_path_buf()), None)
            .await
            .unwrap();
        store
            .store_message(&path("INBOX"), &message("<b@x>", "hi", "there", 1), None)
            .await
            .unwrap();
        while store.populate_index_batch(100, None).await.unwrap() == 100 {}
        store
            .search("hi", 0, 0, &[Some(path("Not/Yet/Created"))], None, None)
            .await
            .unwrap();
        // Resolving the blacklisted path inserted its folder rows.
        let paths: Vec<String> = store
            .list_folders(None)
            .await
            .unwrap()
            .into_iter()
            .map(|(p, _)| p.to_string())
            .collect();
        assert!(paths.contains(&"Not/Yet/Created".to_string()));
        store.close().await.unwrap();
        _ = tempdir.close();
    });
}

#[test]
fn test_search_matches_subset_of_search() {
    smol::block_on(async {
        let tempdir = tempfile::tempdir().unwrap();
        let store = new_store("matches");
        store
            .open(Some(tempdir.path().to_path_buf()), None)
            .await
            .unwrap();
        store
            .store_message(
                &path("INBOX"),
                &message("<s1@x>", "Taxes due", "file your TAXES for 2024", 1),
                None,
            )
            .await
            .unwrap();
        while store.populate_index_batch(100, None).await.unwrap() == 100 {}
        let hits = store
            .search("taxes", 0, 0, &[], None, None)
            .await
            .unwrap()
            .unwrap();
        let ids: Vec<MessageRowId> = hits.iter().map(|r| r.id).collect();
        let matches = store.get_search_matches("taxes", &ids, None).await.unwrap();
        // Offsets point at the literal substrings, lowercased; the raw
        // query words are appended on top.
        assert!(matches.contains("taxes"));
        store.close().await.unwrap();
        _ = tempdir.close();
    });
}

#[test]
fn test_cross_folder_unread_propagation() {
    smol::block_on(async {
        let tempdir = tempfile::tempdir().unwrap();
        let store = new_store("unread");
        store
            .open(Some(tempdir.path().to_path_buf()), None)
            .await
            .unwrap();
        let id = store
            .store_message(&path("INBOX"), &message("<u@x>", "s", "b", 7), None)
            .await
            .unwrap();
        store
            .link_message(&path("All Mail"), id, None)
            .await
            .unwrap();
        let inbox = store.local_folder(&path("INBOX"), None).await.unwrap();
        let all_mail = store.local_folder(&path("All Mail"), None).await.unwrap();
        assert_eq!(all_mail.unread_count(), 0);

        let updates: BTreeMap<MessageRowId, bool> = [(id, true)].into_iter().collect();
        store
            .unread_updated(&path("INBOX"), &updates, None)
            .await
            .unwrap();
        // The source folder accounts for itself; every other containing
        // folder gets the delta.
        assert_eq!(all_mail.unread_count(), 1);
        assert_eq!(inbox.unread_count(), 0);

        // Tombstoned locations still count until the removal commits.
        store
            .mark_remove_pending(&path("All Mail"), &[id], true, None)
            .await
            .unwrap();
        let updates: BTreeMap<MessageRowId, bool> = [(id, false)].into_iter().collect();
        store
            .unread_updated(&path("INBOX"), &updates, None)
            .await
            .unwrap();
        assert_eq!(all_mail.unread_count(), 0);
        store.close().await.unwrap();
        _ = tempdir.close();
    });
}

#[test]
fn test_indexer_batching() {
    smol::block_on(async {
        let tempdir = tempfile::tempdir().unwrap();
        let store = new_store("indexer");
        store
            .open(Some(tempdir.path().to_path_buf()), None)
            .await
            .unwrap();
        for n in 0..250u64 {
            store
                .store_message(
                    &path("INBOX"),
                    &message(&format!("<i{}@x>", n), "bulk", "common token", n),
                    None,
                )
                .await
                .unwrap();
        }
        let mut batches = Vec::new();
        loop {
            let processed = store.populate_index_batch(100, None).await.unwrap();
            batches.push(processed);
            if processed < 100 {
                break;
            }
        }
        assert_eq!(batches, vec![100, 100, 50]);
        // Everything is searchable afterwards; the index caught up with
        // the message table.
        let results = store
            .search("common", 0, 0, &[], None, None)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(results.len(), 250);
        // Nothing left to do.
        assert_eq!(store.populate_index_batch(100, None).await.unwrap(), 0);
        store.close().await.unwrap();
        _ = tempdir.close();
    });
}

#[test]
fn test_contacts_load_and_update() {
    smol::block_on(async {
        let tempdir = tempfile::tempdir().unwrap();
        let store = new_store("contacts");
        store
            .open(Some(tempdir.path().to_path_buf()), None)
            .await
            .unwrap();
        let mut contact = Contact::new("Carol@Example.com".to_string());
        contact.real_name = Some("Carol".to_string());
        contact.highest_importance = 5;
        store.update_contact(&contact, None).await.unwrap();
        assert_eq!(
            store.get_contact("carol@example.com").unwrap().real_name,
            Some("Carol".to_string())
        );

        // Importance never decreases.
        contact.highest_importance = 2;
        store.update_contact(&contact, None).await.unwrap();
        assert_eq!(
            store
                .get_contact("carol@example.com")
                .unwrap()
                .highest_importance,
            5
        );
        store.close().await.unwrap();

        // Contacts are loaded en masse on the next open.
        store
            .open(Some(tempdir.path().to_path_buf()), None)
            .await
            .unwrap();
        assert_eq!(store.contacts().len(), 1);
        assert!(store.get_contact("carol@example.com").is_some());
        store.close().await.unwrap();
        _ = tempdir.close();
    });
}

#[test]
fn test_cancellation_aborts_at_transaction_boundary() {
    smol::block_on(async {
        let tempdir = tempfile::tempdir().unwrap();
        let store = new_store("cancel");
        store
            .open(Some(tempdir.path().to_path_buf()), None)
            .await
            .unwrap();
        let token = CancelToken::new();
        token.cancel();
        let err = store.list_folders(Some(&token)).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::Cancelled);
        let err = store
            .clone_folder(&ImapFolder::new(path("X")), Some(&token))
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::Cancelled);
        // Nothing was persisted.
        assert!(store.list_folders(None).await.unwrap().is_empty());
        store.close().await.unwrap();
        _ = tempdir.close();
    });
}

#[test]
fn test_indexer_cancellation_still_finishes_progress() {
    use std::sync::atomic::{AtomicBool, Ordering};

    #[derive(Debug, Default)]
    struct FinishFlag(AtomicBool);

    impl ProgressMonitor for FinishFlag {
        fn finish(&self) {
            self.0.store(true, Ordering::SeqCst);
        }
    }

    smol::block_on(async {
        let tempdir = tempfile::tempdir().unwrap();
        let description = DatabaseDescription {
            identifier: Some("cancel-idx".into()),
            ..DB.clone()
        };
        let db = Database::open(
            description,
            Some(tempdir.path()),
            None,
            OpenOptions::default(),
        )
        .unwrap();
        let monitor = Arc::new(FinishFlag::default());
        let cancel = CancelToken::new();
        cancel.cancel();
        // Cancellation during the start delay terminates promptly, and
        // the monitor is still finished.
        indexer::run(db, monitor.clone(), cancel).await;
        assert!(monitor.0.load(Ordering::SeqCst));
        _ = tempdir.close();
    });
}

#[test]
fn test_schema_directory_upgrade() {
    let tempdir = tempfile::tempdir().unwrap();
    let description = DatabaseDescription {
        identifier: Some("upgrade".into()),
        ..DB.clone()
    };
    Database::open(
        description.clone(),
        Some(tempdir.path()),
        None,
        OpenOptions::default(),
    )
    .unwrap();

    // A later release expects version 2 and ships the upgrade script.
    let schema_dir = tempdir.path().join("schema");
    std::fs::create_dir_all(&schema_dir).unwrap();
    std::fs::write(
        schema_dir.join("version-002.sql"),
        "ALTER TABLE ContactTable ADD COLUMN avatar TEXT;",
    )
    .unwrap();
    let upgraded = DatabaseDescription {
        version: 2,
        ..description.clone()
    };
    Database::open(
        upgraded,
        Some(tempdir.path()),
        Some(&schema_dir),
        OpenOptions::default(),
    )
    .unwrap();
    // Without the script the version mismatch is refused.
    assert!(Database::open(
        DatabaseDescription {
            version: 3,
            ..description
        },
        Some(tempdir.path()),
        Some(&schema_dir),
        OpenOptions::default(),
    )
    .is_err());
    _ = tempdir.close();
}

#[test]
fn test_corrupt_database_file_is_refused() {
    let tempdir = tempfile::tempdir().unwrap();
    let description = DatabaseDescription {
        identifier: Some("corrupt".into()),
        ..DB.clone()
    };
    let db_path = description.db_path(Some(tempdir.path())).unwrap();
    std::fs::write(&db_path, b"this is not a database file").unwrap();
    assert!(Database::open(
        description,
        Some(tempdir.path()),
        None,
        OpenOptions::default(),
    )
    .is_err());
    _ = tempdir.close();
}

#[test]
fn test_outbox_reports_sends() {
    smol::block_on(async {
        use std::sync::Mutex;

        let tempdir = tempfile::tempdir().unwrap();
        let sent: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
        let info = AccountInfo {
            name: "outbox".to_string().into(),
            primary_email: "bob@x.org".to_string(),
        };
        let store = AccountStore::new(
            info,
            StoreEventConsumer::new(Arc::new({
                let sent = Arc::clone(&sent);
                move |_, event| {
                    if let StoreEvent::EmailSent(message) = event {
                        sent.lock().unwrap().push(message.message_id);
                    }
                }
            })),
        );
        store
            .open(Some(tempdir.path().to_path_buf()), None)
            .await
            .unwrap();
        let outbox = store.outbox().unwrap();
        outbox.mark_sent(message("<sent@x>", "s", "b", 1));
        assert_eq!(sent.lock().unwrap().as_slice(), &["<sent@x>".to_string()]);
        store.close().await.unwrap();
        _ = tempdir.close();
    });
}
