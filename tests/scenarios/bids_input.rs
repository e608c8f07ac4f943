//! Test: BIDS datasets - layout-preserving outputs, sidecar slice timing

use crate::helpers::*;
use base64::{engine::general_purpose, Engine as _};
use flate2::write::GzEncoder;
use flate2::Compression;
use fmri_preprocess::execution::ExecutionEvent;
use serde_json::json;
use std::io::Write;

fn bids_dataset(workspace: &Workspace) {
    let root = workspace.data();
    std::fs::create_dir_all(&root).unwrap();
    std::fs::write(
        root.join("dataset_description.json"),
        r#"{"Name": "rest", "BIDSVersion": "1.6.0"}"#,
    )
    .unwrap();

    // sub-01 ships gzipped with a sidecar carrying slice onsets
    let plain = workspace.dir.path().join("scratch.nii");
    write_bold(&plain, 5);
    let func = root.join("sub-01/func");
    std::fs::create_dir_all(&func).unwrap();
    let mut encoder = GzEncoder::new(
        std::fs::File::create(func.join("sub-01_task-rest_bold.nii.gz")).unwrap(),
        Compression::default(),
    );
    encoder.write_all(&std::fs::read(&plain).unwrap()).unwrap();
    encoder.finish().unwrap();
    std::fs::write(
        func.join("sub-01_task-rest_bold.json"),
        r#"{"RepetitionTime": 2.0, "SliceTiming": [0.0, 0.5, 1.0]}"#,
    )
    .unwrap();

    write_bold(&root.join("sub-02/func/sub-02_task-rest_bold.nii"), 5);
    let events = root.join("sub-02/func/sub-02_task-rest_events.tsv");
    std::fs::write(events, "onset\tduration\n").unwrap();
}

/// Both subjects complete and the outputs mirror the BIDS layout
#[tokio::test]
async fn test_bids_dataset_end_to_end() {
    let workspace = Workspace::new();
    bids_dataset(&workspace);

    let result = run_scenario(&workspace, MockToolkit::new(), json!({})).await;

    assert_completed_response(
        &result.response,
        "BIDS preprocessing completed for 2 of 2 subject(s)",
    );
    assert_eq!(result.batches.len(), 2);
    assert!(result.conversions.is_empty());

    let out = workspace.out();
    let sub01 = out.join("sub-01/func/fmri_spm12");
    assert!(sub01.join("sub-01_task-rest_bold.nii").is_file(), "gz input staged uncompressed");
    assert!(sub01.join("swasub-01_task-rest_bold.nii").is_file());
    assert!(sub01.join("transform.mat").is_file());
    assert!(out.join("sub-02/func/fmri_spm12/swasub-02_task-rest_bold.nii").is_file());

    let qc = std::fs::read_to_string(sub01.join("QC_Framewise_displacement.txt")).unwrap();
    // Four steps of 0.1 mm + 50 mm * 0.001 rad over five volumes
    assert!(qc.starts_with("Mean framewise displacement (mm): 0.120000"), "{}", qc);

    assert!(out.join("outputs_description.txt").is_file());
    assert!(out.join("quality_control_readme.txt").is_file());

    let archive = result.response.output.download_outputs.clone().unwrap();
    assert_eq!(archive, out.join("fmri_outputs.zip").display().to_string());
    let names = archive_names(std::path::Path::new(&archive));
    assert!(names.contains(&"sub-01/func/fmri_spm12/swasub-01_task-rest_bold.nii".to_string()));
    assert!(names.contains(&"sub-02/func/fmri_spm12/QC_Framewise_displacement.txt".to_string()));
    assert!(names.contains(&"outputs_description.txt".to_string()));
    assert!(names.contains(&"wa.png".to_string()));
    assert!(!names.iter().any(|n| n.ends_with("events.tsv")));

    let png = general_purpose::STANDARD
        .decode(result.response.output.display.as_ref().unwrap())
        .unwrap();
    assert_eq!(png, std::fs::read(out.join("wa.png")).unwrap());
}

/// Sidecar onsets become millisecond timings in the slice-timing stage
#[tokio::test]
async fn test_sidecar_slice_timing_used() {
    let workspace = Workspace::new();
    bids_dataset(&workspace);

    let result = run_scenario(&workspace, MockToolkit::new(), json!({})).await;

    let sub01 = result
        .batches
        .iter()
        .find(|b| b.functional.ends_with("sub-01_task-rest_bold.nii"))
        .unwrap();
    assert!(sub01.slice_timing);
    assert!(sub01.text.contains("spm.temporal.st.so = [0 500 1000];"));
    assert!(sub01.text.contains("spm.temporal.st.refslice = 500;"));
    assert!(sub01.text.contains("spm.temporal.st.tr = 2;"));

    // No sidecar: slice indices in ascending order from the header
    let sub02 = result
        .batches
        .iter()
        .find(|b| b.functional.ends_with("sub-02_task-rest_bold.nii"))
        .unwrap();
    assert!(sub02.text.contains("spm.temporal.st.so = [1 2 3];"));
    assert!(sub02.script.ends_with("fmri_preprocess_batch.m"));
}

/// Options disable slice timing and change the smoothing kernel
#[tokio::test]
async fn test_options_change_the_batch() {
    let workspace = Workspace::new();
    bids_dataset(&workspace);

    let result = run_scenario(
        &workspace,
        MockToolkit::new(),
        json!({ "options": { "options_stc_flag": false, "fwhm": "8" } }),
    )
    .await;

    assert_completed_response(
        &result.response,
        "BIDS preprocessing completed for 2 of 2 subject(s)",
    );
    for batch in &result.batches {
        assert!(!batch.slice_timing);
        assert!(batch.text.contains("spm.spatial.smooth.fwhm = [8 8 8];"));
    }
    let out = workspace.out();
    assert!(out.join("sub-01/func/fmri_spm12/swsub-01_task-rest_bold.nii").is_file());

    let manual = std::fs::read_to_string(out.join("outputs_description.txt")).unwrap();
    assert!(manual.contains("s-Smoothed with fwhm(mm) [8 8 8]"));
    assert!(!manual.contains("a-Slicetime corrected"));
}

/// Events follow the run from start to finish
#[tokio::test]
async fn test_events_in_order() {
    let workspace = Workspace::new();
    bids_dataset(&workspace);

    let result = run_scenario(&workspace, MockToolkit::new(), json!({})).await;

    let kinds: Vec<&str> = result
        .events
        .iter()
        .map(|e| match e {
            ExecutionEvent::RunStarted { .. } => "run_started",
            ExecutionEvent::SubjectStarted { .. } => "subject_started",
            ExecutionEvent::ToolkitStarted { .. } => "toolkit_started",
            ExecutionEvent::SubjectCompleted { .. } => "subject_completed",
            ExecutionEvent::SubjectFailed { .. } => "subject_failed",
            ExecutionEvent::RunCompleted { .. } => "run_completed",
        })
        .collect();
    assert_eq!(
        kinds,
        vec![
            "run_started",
            "subject_started",
            "toolkit_started",
            "subject_completed",
            "subject_started",
            "toolkit_started",
            "subject_completed",
            "run_completed",
        ]
    );
}
