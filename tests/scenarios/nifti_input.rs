//! Test: NIfTI inputs from a list file or from the request itself

use crate::helpers::*;
use base64::{engine::general_purpose, Engine as _};
use flate2::write::GzEncoder;
use flate2::Compression;
use serde_json::json;
use std::io::Write;

fn nifti_inputs(workspace: &Workspace) {
    let root = workspace.data();
    write_bold(&root.join("run1.nii"), 4);

    let plain = workspace.dir.path().join("scratch.nii");
    write_bold(&plain, 6);
    let mut encoder = GzEncoder::new(
        std::fs::File::create(root.join("run2.nii.gz")).unwrap(),
        Compression::default(),
    );
    encoder.write_all(&std::fs::read(&plain).unwrap()).unwrap();
    encoder.finish().unwrap();

    std::fs::write(root.join("notes.nii"), "not an image").unwrap();
}

/// A CSV list names the series; unreadable entries are skipped
#[tokio::test]
async fn test_paths_file_numbers_subjects() {
    let workspace = Workspace::new();
    nifti_inputs(&workspace);
    let list = "run1.nii,notes.nii\nrun2.nii.gz\n";
    std::fs::write(workspace.data().join("paths.csv"), list).unwrap();

    let result = run_scenario(&workspace, MockToolkit::new(), json!({})).await;

    assert_completed_response(
        &result.response,
        "NIfTI preprocessing completed for 2 of 2 subject(s)",
    );
    let out = workspace.out();
    assert!(out.join("sub-1/func/fmri_spm12/swarun1.nii").is_file());
    assert!(out.join("sub-2/func/fmri_spm12/run2.nii").is_file());
    assert!(out.join("sub-2/func/fmri_spm12/swarun2.nii").is_file());

    let manual = std::fs::read_to_string(out.join("outputs_description.txt")).unwrap();
    assert!(manual.contains("sub-1,sub-2,sub-*"));

    let names = archive_names(&out.join("fmri_outputs.zip"));
    assert!(names.contains(&"sub-1/func/fmri_spm12/swarun1.nii".to_string()));
    assert!(names.contains(&"sub-2/func/fmri_spm12/rp_run2.txt".to_string()));
    assert!(names.contains(&"quality_control_readme.txt".to_string()));
}

/// Paths in the request take priority over any list file
#[tokio::test]
async fn test_request_paths_take_priority() {
    let workspace = Workspace::new();
    nifti_inputs(&workspace);
    std::fs::write(workspace.data().join("paths.txt"), "run1.nii\nrun2.nii.gz\n").unwrap();

    let result = run_scenario(
        &workspace,
        MockToolkit::new(),
        json!({ "data": ["run2.nii.gz"], "options": { "options_stc_flag": 0 } }),
    )
    .await;

    assert_completed_response(
        &result.response,
        "NIfTI preprocessing completed for 1 of 1 subject(s)",
    );
    assert_eq!(result.batches.len(), 1);
    assert!(result.batches[0].functional.ends_with("sub-1/func/fmri_spm12/run2.nii"));
    assert!(!result.batches[0].slice_timing);

    let out = workspace.out();
    assert!(out.join("sub-1/func/fmri_spm12/swrun2.nii").is_file());
    assert!(!out.join("sub-2").exists());
    assert!(out.join("wa.png").is_file());
}

/// Every volume of the staged series is listed in the batch
#[tokio::test]
async fn test_batch_lists_all_volumes() {
    let workspace = Workspace::new();
    nifti_inputs(&workspace);

    let input = json!({ "data": ["run2.nii.gz"] });
    let result = run_scenario(&workspace, MockToolkit::new(), input).await;

    let text = &result.batches[0].text;
    let staged = workspace.out().join("sub-1/func/fmri_spm12/run2.nii");
    assert!(text.contains(&format!("'{},6'", staged.display())));
    assert!(!text.contains(&format!("'{},7'", staged.display())));
}

/// An input named with the display prefix is not shown in place of the
/// normalised image
#[tokio::test]
async fn test_display_uses_normalised_image() {
    let workspace = Workspace::new();
    write_bold(&workspace.data().join("water_task.nii"), 4);
    std::fs::write(workspace.data().join("paths.txt"), "water_task.nii\n").unwrap();

    let result = run_scenario(&workspace, MockToolkit::new(), json!({})).await;

    assert_completed_response(
        &result.response,
        "NIfTI preprocessing completed for 1 of 1 subject(s)",
    );
    let png = general_purpose::STANDARD
        .decode(result.response.output.display.as_ref().unwrap())
        .unwrap();
    let preview = image::load_from_memory_with_format(&png, image::ImageFormat::Png).unwrap();
    // wawater_task.nii is 5x6x4: sagittal 6 + coronal 5 + axial 5 wide
    assert_eq!(preview.width(), 16);
    assert_eq!(preview.height(), 6);
}
