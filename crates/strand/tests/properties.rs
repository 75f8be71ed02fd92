//! Property tests over the client's fold and persistence path.

use proptest::prelude::*;

use strand::crypto::MemoryCryptoStore;
use strand::store::MemoryAdapter;
use strand::{ClientConfig, StreamClient, StreamKind, SyncCookie};
use strand_testkit::generators::message_text;
use strand_testkit::{StreamFixture, TestWallet};

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    #[test]
    fn test_ingest_is_idempotent_and_tracks_leaf(texts in prop::collection::vec(message_text(), 1..8)) {
        runtime().block_on(async {
            let client = StreamClient::open(
                TestWallet::new().context,
                MemoryAdapter::new(),
                MemoryCryptoStore::new(),
                ClientConfig::default(),
            )
            .await
            .unwrap();

            let mut stream = StreamFixture::new(StreamKind::Channel);
            let mut last = stream.inception.hash;
            for text in &texts {
                last = stream.message(text);
            }

            let events = stream.pending().to_vec();
            let first = client.ingest_events(&stream.stream_id, events.clone()).await.unwrap();
            prop_assert_eq!(first.folded, texts.len() + 1);

            let again = client.ingest_events(&stream.stream_id, events).await.unwrap();
            prop_assert_eq!(again.folded, 0);

            let view = client.view(&stream.stream_id).await.unwrap();
            prop_assert_eq!(view.leaf_event_hashes(), vec![last]);
            prop_assert_eq!(view.messages().len(), texts.len());
            Ok(())
        })?;
    }

    #[test]
    fn test_resume_matches_sealed_history(split in 1usize..6, total in 6usize..10) {
        runtime().block_on(async {
            let client = StreamClient::open(
                TestWallet::new().context,
                MemoryAdapter::new(),
                MemoryCryptoStore::new(),
                ClientConfig::default(),
            )
            .await
            .unwrap();

            // Messages before `split` are sealed, the rest stay in the minipool
            let mut stream = StreamFixture::new(StreamKind::Channel);
            for i in 0..split {
                stream.message(&format!("sealed {i}"));
            }
            let mb0 = stream.seal_miniblock(true);
            client.apply_miniblock(&mb0, stream.cookie()).await.unwrap();
            for i in split..total {
                stream.message(&format!("pending {i}"));
            }
            client.persistence().save_synced_stream(&stream.pointer()).await.unwrap();

            let resumed = client.load_stream(&stream.stream_id).await.unwrap().unwrap();
            prop_assert_eq!(resumed.view.messages().len(), total);
            Ok(())
        })?;
    }

    #[test]
    fn test_fold_order_does_not_change_leaves(
        texts in prop::collection::vec(message_text(), 1..8),
        order in Just((0usize..8).collect::<Vec<_>>()).prop_shuffle(),
    ) {
        runtime().block_on(async {
            let client = StreamClient::open(
                TestWallet::new().context,
                MemoryAdapter::new(),
                MemoryCryptoStore::new(),
                ClientConfig::default(),
            )
            .await
            .unwrap();

            let mut stream = StreamFixture::new(StreamKind::Channel);
            let mut last = stream.inception.hash;
            for text in &texts {
                last = stream.message(text);
            }

            // Inception first, then the chain in arbitrary order
            let events = stream.pending();
            let mut shuffled = vec![events[0].clone()];
            shuffled.extend(
                order
                    .iter()
                    .filter(|i| **i < texts.len())
                    .map(|i| events[i + 1].clone()),
            );

            client.ingest_events(&stream.stream_id, shuffled).await.unwrap();
            let view = client.view(&stream.stream_id).await.unwrap();
            prop_assert_eq!(view.leaf_event_hashes(), vec![last]);
            Ok(())
        })?;
    }

    #[test]
    fn test_sync_pointer_never_moves_back(count in 2i64..6, replay in 0i64..6) {
        runtime().block_on(async {
            let client = StreamClient::open(
                TestWallet::new().context,
                MemoryAdapter::new(),
                MemoryCryptoStore::new(),
                ClientConfig::default(),
            )
            .await
            .unwrap();

            let mut stream = StreamFixture::new(StreamKind::Channel);
            let mut miniblocks = Vec::new();
            for i in 0..count {
                stream.message(&format!("block {i}"));
                miniblocks.push(stream.seal_miniblock(i == 0));
            }
            for mb in &miniblocks {
                let cookie = SyncCookie { stream_id: stream.stream_id, generation: mb.miniblock_num + 1 };
                client.apply_miniblock(mb, cookie).await.unwrap();
            }

            let replayed = &miniblocks[(replay % count) as usize];
            let cookie = SyncCookie { stream_id: stream.stream_id, generation: replayed.miniblock_num + 1 };
            prop_assert!(!client.apply_miniblock(replayed, cookie).await.unwrap());

            let synced = client.persistence().get_synced_stream(&stream.stream_id).await.unwrap().unwrap();
            prop_assert_eq!(synced.last_miniblock_num, count - 1);
            prop_assert!(client.load_stream(&stream.stream_id).await.unwrap().is_some());
            Ok(())
        })?;
    }
}
