//! Disk scheduler scenario tests.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use stratadb::storage::{DiskData, DiskRequest, DiskScheduler};
use stratadb::{DiskManager, Page, PageId};
use tempfile::tempdir;

fn create_scheduler() -> (DiskScheduler, tempfile::TempDir) {
    let dir = tempdir().unwrap();
    let path = dir.path().join("test.db");
    let dm = DiskManager::create(&path).unwrap();
    (DiskScheduler::new(dm), dir)
}

/// 1000 alternating write/read requests: every completion fires, and each
/// read observes the most recent write to its page id.
#[test]
fn test_thousand_alternating_requests() {
    let (scheduler, _dir) = create_scheduler();

    const PAGES: u32 = 50;
    let mut latest: HashMap<u32, u8> = HashMap::new();

    for i in 0u32..1000 {
        let page_id = i % PAGES;

        if i % 2 == 0 {
            let fill = (i % 250 + 1) as u8;
            let mut page = Page::new();
            page.as_mut_slice().fill(fill);

            let (done, completion) = DiskScheduler::create_completion();
            scheduler.schedule(DiskRequest {
                page_id: PageId::new(page_id),
                data: DiskData::Write(Box::new(page)),
                done,
            });
            assert!(completion.wait(), "write {} did not complete", i);
            latest.insert(page_id, fill);
        } else {
            let buffer = Arc::new(Mutex::new(Page::new()));
            let (done, completion) = DiskScheduler::create_completion();
            scheduler.schedule(DiskRequest {
                page_id: PageId::new(page_id),
                data: DiskData::Read(Arc::clone(&buffer)),
                done,
            });
            assert!(completion.wait(), "read {} did not complete", i);

            let expected = latest.get(&page_id).copied().unwrap_or(0);
            let page = buffer.lock().unwrap();
            assert_eq!(page.as_slice()[0], expected);
            assert_eq!(page.as_slice()[4095], expected);
        }
    }
}

/// A burst of writes queued without waiting still completes in order.
#[test]
fn test_queued_burst() {
    let (scheduler, _dir) = create_scheduler();

    let mut completions = Vec::new();
    for i in 0u32..100 {
        let mut page = Page::new();
        // Every write to page 7 has a distinct payload; the last must win.
        page.as_mut_slice()[0] = i as u8;

        let (done, completion) = DiskScheduler::create_completion();
        scheduler.schedule(DiskRequest {
            page_id: PageId::new(7),
            data: DiskData::Write(Box::new(page)),
            done,
        });
        completions.push(completion);
    }

    for (i, completion) in completions.into_iter().enumerate() {
        assert!(completion.wait(), "write {} did not complete", i);
    }

    let buffer = Arc::new(Mutex::new(Page::new()));
    let (done, completion) = DiskScheduler::create_completion();
    scheduler.schedule(DiskRequest {
        page_id: PageId::new(7),
        data: DiskData::Read(Arc::clone(&buffer)),
        done,
    });
    assert!(completion.wait());
    assert_eq!(buffer.lock().unwrap().as_slice()[0], 99);
}

/// Reads of pages never written resolve to zeroed buffers, not errors.
#[test]
fn test_read_before_any_write() {
    let (scheduler, _dir) = create_scheduler();

    let buffer = Arc::new(Mutex::new(Page::new()));
    {
        let mut page = buffer.lock().unwrap();
        page.as_mut_slice()[9] = 0x77; // stale caller data
    }

    let (done, completion) = DiskScheduler::create_completion();
    scheduler.schedule(DiskRequest {
        page_id: PageId::new(12),
        data: DiskData::Read(Arc::clone(&buffer)),
        done,
    });
    assert!(completion.wait());
    assert!(buffer.lock().unwrap().as_slice().iter().all(|&b| b == 0));
}
