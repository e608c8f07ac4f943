//! Test: failures reported in the response versus failures that abort

use crate::helpers::*;
use fmri_preprocess::core::ExecutionStatus;
use fmri_preprocess::execution::{ExecutionError, ExecutionEvent, PipelineEngine};
use serde_json::json;
use std::sync::Arc;

fn two_runs(workspace: &Workspace) {
    let root = workspace.data();
    write_bold(&root.join("run1.nii"), 4);
    write_bold(&root.join("run2.nii"), 4);
    std::fs::write(root.join("paths.txt"), "run1.nii\nrun2.nii\n").unwrap();
}

/// One failed subject does not stop the others
#[tokio::test]
async fn test_partial_failure() {
    let workspace = Workspace::new();
    two_runs(&workspace);

    let result = run_scenario(&workspace, MockToolkit::failing_on("run2"), json!({})).await;

    assert_completed_response(
        &result.response,
        "NIfTI preprocessing completed for 1 of 2 subject(s); failed: sub-2",
    );
    let names = archive_names(&workspace.out().join("fmri_outputs.zip"));
    assert!(names.iter().any(|n| n.starts_with("sub-1/")));
    assert!(!names.iter().any(|n| n.starts_with("sub-2/")));

    assert!(result.events.iter().any(|e| matches!(
        e,
        ExecutionEvent::SubjectFailed { subject, .. } if subject == "sub-2"
    )));
    assert!(result.events.iter().any(|e| matches!(
        e,
        ExecutionEvent::RunCompleted { status: ExecutionStatus::PartiallyCompleted, .. }
    )));
}

/// No archive or display when every subject fails
#[tokio::test]
async fn test_all_subjects_fail() {
    let workspace = Workspace::new();
    two_runs(&workspace);

    let result = run_scenario(&workspace, MockToolkit::failing_on("run"), json!({})).await;

    assert_message_only(&result.response, "NIfTI preprocessing failed for all 2 subject(s)");
    assert!(result.response.output.message.contains("sub-1 ("));
    assert!(!workspace.out().join("fmri_outputs.zip").exists());
    // Guides are still written
    assert!(workspace.out().join("outputs_description.txt").is_file());
}

/// A toolkit run that leaves no smoothed image counts as a failure
#[tokio::test]
async fn test_missing_toolkit_output() {
    let workspace = Workspace::new();
    two_runs(&workspace);
    let toolkit = MockToolkit {
        omit_outputs: true,
        ..MockToolkit::new()
    };

    let result = run_scenario(&workspace, toolkit, json!({})).await;

    assert_message_only(&result.response, "failed for all 2 subject(s)");
    assert!(result.response.output.message.contains("toolkit did not produce"));
}

#[tokio::test]
async fn test_no_data_found() {
    let workspace = Workspace::new();
    std::fs::create_dir_all(workspace.data()).unwrap();

    let result = run_scenario(&workspace, MockToolkit::new(), json!({})).await;

    assert_message_only(&result.response, "No BIDS, NIfTI or DICOM fMRI data found");
    assert!(result.batches.is_empty());
    assert!(result.events.is_empty());
}

#[tokio::test]
async fn test_unwritable_output_directory() {
    let workspace = Workspace::new();
    two_runs(&workspace);
    // A regular file where the output directory should be
    std::fs::write(workspace.out(), "occupied").unwrap();

    let result = run_scenario(&workspace, MockToolkit::new(), json!({})).await;

    assert_message_only(&result.response, "is not writable");
    assert!(result.batches.is_empty());
}

/// A custom template with other dimensions is reported, nothing runs
#[tokio::test]
async fn test_template_dimension_mismatch() {
    let workspace = Workspace::new();
    two_runs(&workspace);
    let custom = workspace.dir.path().join("custom_tpm.nii");
    write_nifti(&custom, &[3, 3, 3, 2], 0.0, |_| 0.1);

    let result = run_scenario(
        &workspace,
        MockToolkit::new(),
        json!({ "options": { "registration_template": custom } }),
    )
    .await;

    assert_message_only(&result.response, "custom_tpm.nii");
    assert!(result.batches.is_empty());
}

/// A matching custom template is used in the batch
#[tokio::test]
async fn test_matching_template_used() {
    let workspace = Workspace::new();
    two_runs(&workspace);
    let custom = workspace.dir.path().join("custom_tpm.nii");
    write_nifti(&custom, &[6, 7, 5, 2], 0.0, |_| 0.1);

    let result = run_scenario(
        &workspace,
        MockToolkit::new(),
        json!({ "options": { "registration_template": custom } }),
    )
    .await;

    assert!(result.response.output.message.contains("2 of 2"));
    for batch in &result.batches {
        assert!(batch.text.contains(&format!("tpm = {{'{}'}}", custom.display())));
    }
}

/// Invalid options abort the run instead of producing a response
#[tokio::test]
async fn test_invalid_options_abort() {
    let workspace = Workspace::new();
    two_runs(&workspace);
    let toolkit = MockToolkit::new();
    let runner = Arc::new(FakeTools::default());
    let engine = PipelineEngine::new(toolkit.clone(), runner, workspace.config());

    let request = workspace.request(json!({ "options": { "fwhm": "wide" } }));
    let err = engine.run(&request).await.unwrap_err();

    assert!(matches!(err, ExecutionError::Options(_)));
    assert!(toolkit.recorded().is_empty());
    assert!(!workspace.out().exists());
}

/// A slice order naming a slice the series does not have fails before SPM runs
#[tokio::test]
async fn test_bad_slice_order_rejected_before_toolkit() {
    let workspace = Workspace::new();
    two_runs(&workspace);

    let result = run_scenario(
        &workspace,
        MockToolkit::new(),
        json!({ "options": { "stc_slice_order": [1, 2, 9] } }),
    )
    .await;

    assert_message_only(&result.response, "failed for all 2 subject(s)");
    assert!(result
        .response
        .output
        .message
        .contains("slice timing: slice index 9 outside 1..=3"));
    assert!(result.batches.is_empty());
}
