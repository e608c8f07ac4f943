//! Test: DICOM series converted before preprocessing

use crate::helpers::*;
use serde_json::json;

fn dicom_study(workspace: &Workspace) {
    let study = workspace.data().join("study");
    write_dicom(&study.join("series1/IM0001"), 1);
    write_dicom(&study.join("series1/IM0002"), 2);
    write_dicom(&study.join("series2/IM0001"), 3);
    std::fs::write(study.join("series2/README"), "acquisition notes").unwrap();
}

/// Each series directory becomes one numbered subject
#[tokio::test]
async fn test_dicom_series_converted_and_processed() {
    let workspace = Workspace::new();
    dicom_study(&workspace);

    let result = run_scenario(&workspace, MockToolkit::new(), json!({})).await;

    assert_completed_response(
        &result.response,
        "DICOM preprocessing completed for 2 of 2 subject(s)",
    );

    let study = workspace.data().join("study");
    let mut converted = result.conversions.clone();
    converted.sort();
    assert_eq!(converted, vec![study.join("series1"), study.join("series2")]);

    let out = workspace.out();
    for subject in ["sub-1", "sub-2"] {
        let dir = out.join(subject).join("func/fmri_spm12");
        assert!(dir.join(format!("{}.nii", subject)).is_file());
        assert!(dir.join(format!("swa{}.nii", subject)).is_file());
        assert!(dir.join("QC_Framewise_displacement.txt").is_file());
    }
    assert_eq!(result.batches.len(), 2);
}

/// Files without the DICOM marker are not mistaken for a series
#[tokio::test]
async fn test_unmarked_files_are_not_dicom() {
    let workspace = Workspace::new();
    let dir = workspace.data().join("study/series1");
    std::fs::create_dir_all(&dir).unwrap();
    std::fs::write(dir.join("IM0001"), vec![0u8; 256]).unwrap();

    let result = run_scenario(&workspace, MockToolkit::new(), json!({})).await;

    assert_message_only(&result.response, "No BIDS, NIfTI or DICOM fMRI data found");
    assert!(result.conversions.is_empty());
}
