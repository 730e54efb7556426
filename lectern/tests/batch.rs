use lectern::{
    batch::{Batch, RetryController, RetryEntry},
    config::BatchConfig,
    course::Course,
    failure::{FailureLedger, FailureReason},
    pipeline::{LectureOutcome, LectureProcessor, LectureTask},
};
use serde_json::json;
use std::{cell::RefCell, collections::HashMap, fs};

/// Fails each lecture a scripted number of times with the given reason, then writes its output.
#[derive(Default)]
struct Scripted {
    failures: RefCell<HashMap<u64, (u32, FailureReason)>>,
    calls: RefCell<Vec<u64>>,
}

impl Scripted {
    fn fail(self, lecture_id: u64, times: u32, reason: FailureReason) -> Self {
        self.failures
            .borrow_mut()
            .insert(lecture_id, (times, reason));
        self
    }

    fn calls_for(&self, lecture_id: u64) -> usize {
        self.calls
            .borrow()
            .iter()
            .filter(|x| **x == lecture_id)
            .count()
    }
}

impl LectureProcessor for Scripted {
    fn process(&self, task: &LectureTask) -> LectureOutcome {
        if task.output.is_file() {
            return LectureOutcome::Skipped;
        }

        self.calls.borrow_mut().push(task.lecture.id);

        if let Some((times, reason)) = self.failures.borrow_mut().get_mut(&task.lecture.id)
            && *times > 0
        {
            *times -= 1;
            return LectureOutcome::Failed(reason.clone());
        }

        fs::write(task.output, b"video").unwrap();
        LectureOutcome::Completed
    }
}

fn course() -> Course {
    serde_json::from_value(json!({
        "course_id": 42,
        "title": "Systems Programming",
        "chapters": [
            {
                "chapter_index": 1,
                "chapter_title": "Basics",
                "lectures": [
                    {"id": 1, "index": 1, "lecture_title": "Intro"},
                    {"id": 2, "index": 2, "lecture_title": "Setup"},
                    {"id": 3, "index": 3, "lecture_title": "Slides", "extension": "pdf"}
                ]
            },
            {
                "chapter_index": 2,
                "chapter_title": "Advanced",
                "lectures": [{"id": 4, "index": 1, "lecture_title": "Unsafe"}]
            }
        ]
    }))
    .unwrap()
}

fn download_failure() -> FailureReason {
    FailureReason::Download {
        tool: "yt-dlp".to_owned(),
        code: 1,
    }
}

#[test]
fn all_lectures_are_downloaded() {
    let dir = tempfile::tempdir().unwrap();
    let config = BatchConfig::default();
    let processor = Scripted::default();
    let mut batch = Batch::new(&config);

    let report = batch.run(&processor, &course(), dir.path()).unwrap();

    assert_eq!(report.completed, 3);
    assert!(report.missing.is_empty());
    assert!(batch.ledger().is_empty());
    assert!(dir.path().join("Basics").join("Intro.mp4").is_file());
    assert!(dir.path().join("Advanced").join("Unsafe.mp4").is_file());
    // non video lectures are never handed to the pipeline
    assert_eq!(processor.calls_for(3), 0);
}

#[test]
fn retry_clears_ledger_on_success() {
    let dir = tempfile::tempdir().unwrap();
    let config = BatchConfig {
        strict: true,
        ..Default::default()
    };
    let processor = Scripted::default().fail(2, 1, download_failure());
    let mut batch = Batch::new(&config);

    let report = batch.run(&processor, &course(), dir.path()).unwrap();

    assert_eq!(report.failed, 1);
    assert_eq!(report.retried, 1);
    assert!(report.missing.is_empty());
    assert_eq!(processor.calls_for(2), 2);
    assert!(batch.ledger().is_empty());
    assert!(!batch.strict_violation());
}

#[test]
fn persistent_failure_stays_in_ledger() {
    let dir = tempfile::tempdir().unwrap();
    let config = BatchConfig {
        retry_limit: 2,
        strict: true,
        ..Default::default()
    };
    let processor = Scripted::default().fail(4, 10, download_failure());
    let mut batch = Batch::new(&config);

    let report = batch.run(&processor, &course(), dir.path()).unwrap();

    assert_eq!(processor.calls_for(4), 3);
    assert_eq!(report.missing.len(), 1);
    assert_eq!(report.missing[0].lecture.id, 4);
    assert_eq!(batch.ledger().len(), 3);
    assert_eq!(batch.ledger().lecture_count(), 1);
    assert!(
        batch
            .ledger()
            .records()
            .iter()
            .all(|x| x.lecture_id == "4")
    );
    assert!(batch.strict_violation());
}

#[test]
fn strict_is_off_by_default() {
    let dir = tempfile::tempdir().unwrap();
    let config = BatchConfig::default();
    let processor = Scripted::default().fail(1, 10, download_failure());
    let mut batch = Batch::new(&config);

    batch.run(&processor, &course(), dir.path()).unwrap();

    assert!(!batch.ledger().is_empty());
    assert!(!batch.strict_violation());
}

#[test]
fn missing_keys_are_not_retried() {
    let dir = tempfile::tempdir().unwrap();
    let config = BatchConfig::default();
    let reason = FailureReason::KeyNotFound {
        track: lectern::failure::Track::Video,
        kid: "aa110000000000000000000000000000".to_owned(),
    };
    let processor = Scripted::default().fail(1, 1, reason.clone());
    let mut batch = Batch::new(&config);

    let report = batch.run(&processor, &course(), dir.path()).unwrap();

    assert_eq!(processor.calls_for(1), 1);
    assert_eq!(report.missing.len(), 1);
    assert_eq!(report.missing[0].last_reason, Some(reason));
    assert_eq!(batch.ledger().len(), 1);
}

#[test]
fn chapter_filter_limits_work() {
    let dir = tempfile::tempdir().unwrap();
    let config = BatchConfig {
        chapters: Some("2".parse().unwrap()),
        ..Default::default()
    };
    let processor = Scripted::default();
    let mut batch = Batch::new(&config);

    let report = batch.run(&processor, &course(), dir.path()).unwrap();

    assert_eq!(report.completed, 1);
    assert_eq!(processor.calls_for(1), 0);
    assert_eq!(processor.calls_for(4), 1);
    assert!(!dir.path().join("Basics").exists());
}

#[test]
fn existing_outputs_are_skipped() {
    let dir = tempfile::tempdir().unwrap();
    fs::create_dir_all(dir.path().join("Basics")).unwrap();
    fs::write(dir.path().join("Basics").join("Intro.mp4"), b"old").unwrap();

    let config = BatchConfig::default();
    let processor = Scripted::default();
    let mut batch = Batch::new(&config);

    let report = batch.run(&processor, &course(), dir.path()).unwrap();

    assert_eq!(report.skipped, 1);
    assert_eq!(report.completed, 2);
    assert_eq!(processor.calls_for(1), 0);
}

#[test]
fn disabled_retries_keep_queue() {
    let dir = tempfile::tempdir().unwrap();
    let course = course();
    let lecture = course.chapters[0].lectures[0].clone();
    let entry = RetryEntry {
        lecture,
        output: dir.path().join("Intro.mp4"),
        work_dir: dir.path().to_owned(),
        last_reason: Some(download_failure()),
    };
    let processor = Scripted::default();
    let mut ledger = FailureLedger::default();

    let missing = RetryController::new(0).run(&processor, vec![entry], &mut ledger);

    assert_eq!(missing.len(), 1);
    assert_eq!(processor.calls_for(1), 0);
}
