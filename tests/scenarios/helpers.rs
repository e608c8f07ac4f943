//! Test utilities: a mock toolkit that writes what SPM would write, a fake
//! DICOM converter and small NIfTI/DICOM file builders.

use async_trait::async_trait;
use fmri_preprocess::core::{AdapterConfig, ComputationRequest, ComputationResponse};
use fmri_preprocess::execution::{ExecutionEvent, PipelineEngine};
use fmri_preprocess::input::volume::VolumeInfo;
use fmri_preprocess::toolkit::{ProcessOutput, ProcessRunner, ToolkitError, ToolkitExecutor};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

pub const SPM_VERSION: &str = "12.7169";

/// Write a float32 NIfTI-1 file; voxel `i` gets `fill(i)`
pub fn write_nifti(path: &Path, dims: &[u16], pixdim4: f32, fill: impl Fn(usize) -> f32) {
    let mut bytes = vec![0u8; 352];
    bytes[0..4].copy_from_slice(&348i32.to_le_bytes());
    let mut dim = [1u16; 8];
    dim[0] = dims.len() as u16;
    dim[1..=dims.len()].copy_from_slice(dims);
    for (i, d) in dim.iter().enumerate() {
        bytes[40 + i * 2..42 + i * 2].copy_from_slice(&d.to_le_bytes());
    }
    bytes[70..72].copy_from_slice(&16i16.to_le_bytes());
    bytes[72..74].copy_from_slice(&32i16.to_le_bytes());
    let mut pixdim = [1.0f32; 8];
    pixdim[4] = pixdim4;
    for (i, p) in pixdim.iter().enumerate() {
        bytes[76 + i * 4..80 + i * 4].copy_from_slice(&p.to_le_bytes());
    }
    bytes[108..112].copy_from_slice(&352f32.to_le_bytes());
    bytes[112..116].copy_from_slice(&1f32.to_le_bytes());
    bytes[123] = 0x0A;
    bytes[344..348].copy_from_slice(b"n+1\0");

    let count: usize = dims.iter().map(|d| *d as usize).product();
    for i in 0..count {
        bytes.extend_from_slice(&fill(i).to_le_bytes());
    }
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(path, bytes).unwrap();
}

/// A 4x4x3 series with `volumes` time points and TR 2 s
pub fn write_bold(path: &Path, volumes: u16) {
    write_nifti(path, &[4, 4, 3, volumes], 2.0, |i| (i % 17) as f32);
}

/// Write a minimal DICOM Part 10 file (explicit VR little endian meta group,
/// one Modality element in the data set)
pub fn write_dicom(path: &Path, instance: u32) {
    fn element(out: &mut Vec<u8>, group: u16, elem: u16, vr: &[u8; 2], value: &[u8]) {
        let mut value = value.to_vec();
        if value.len() % 2 == 1 {
            value.push(if vr == b"UI" { 0 } else { b' ' });
        }
        out.extend_from_slice(&group.to_le_bytes());
        out.extend_from_slice(&elem.to_le_bytes());
        out.extend_from_slice(vr);
        if vr == b"OB" {
            out.extend_from_slice(&[0, 0]);
            out.extend_from_slice(&(value.len() as u32).to_le_bytes());
        } else {
            out.extend_from_slice(&(value.len() as u16).to_le_bytes());
        }
        out.extend_from_slice(&value);
    }

    let mut meta = Vec::new();
    element(&mut meta, 0x0002, 0x0001, b"OB", &[0, 1]);
    element(&mut meta, 0x0002, 0x0002, b"UI", b"1.2.840.10008.5.1.4.1.1.4");
    element(&mut meta, 0x0002, 0x0003, b"UI", format!("2.25.{}", 1000 + instance).as_bytes());
    element(&mut meta, 0x0002, 0x0010, b"UI", b"1.2.840.10008.1.2.1");
    element(&mut meta, 0x0002, 0x0012, b"UI", b"2.25.424242");

    let mut bytes = vec![0u8; 128];
    bytes.extend_from_slice(b"DICM");
    element(&mut bytes, 0x0002, 0x0000, b"UL", &(meta.len() as u32).to_le_bytes());
    bytes.extend_from_slice(&meta);
    element(&mut bytes, 0x0008, 0x0060, b"CS", b"MR");

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(path, bytes).unwrap();
}

/// Batch facts the mock toolkit read from a script
#[derive(Debug, Clone)]
pub struct RecordedBatch {
    pub script: PathBuf,
    pub functional: PathBuf,
    pub slice_timing: bool,
    pub text: String,
}

/// Toolkit that fakes SPM by writing the files a real run would produce
#[derive(Clone, Default)]
pub struct MockToolkit {
    /// Fail batches whose functional image path contains this text
    pub fail_on: Option<String>,
    /// Skip writing the smoothed output
    pub omit_outputs: bool,
    pub batches: Arc<Mutex<Vec<RecordedBatch>>>,
}

impl MockToolkit {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_on(text: &str) -> Self {
        Self {
            fail_on: Some(text.to_string()),
            ..Self::default()
        }
    }

    pub fn recorded(&self) -> Vec<RecordedBatch> {
        self.batches.lock().unwrap().clone()
    }
}

/// First frame entry of the `scans` cell in a batch script
fn functional_from_script(text: &str) -> Option<PathBuf> {
    let mut lines = text.lines().skip_while(|l| !l.starts_with("scans = {"));
    lines.next()?;
    let entry = lines.next()?.trim().trim_matches('\'');
    let path = entry.rsplit_once(',').map(|(p, _)| p).unwrap_or(entry);
    Some(PathBuf::from(path.replace("''", "'")))
}

fn prefixed(path: &Path, prefix: &str) -> PathBuf {
    let name = path.file_name().unwrap().to_string_lossy();
    path.with_file_name(format!("{}{}", prefix, name))
}

#[async_trait]
impl ToolkitExecutor for MockToolkit {
    async fn version(&self) -> Result<String, ToolkitError> {
        Ok(SPM_VERSION.to_string())
    }

    async fn run_batch(
        &self,
        script: &Path,
        work_dir: &Path,
    ) -> Result<ProcessOutput, ToolkitError> {
        let text = std::fs::read_to_string(script).unwrap();
        let functional = functional_from_script(&text).expect("batch lists the functional scans");
        assert!(functional.starts_with(work_dir), "inputs are staged in the work dir");
        let slice_timing = text.contains("spm.temporal.st");

        self.batches.lock().unwrap().push(RecordedBatch {
            script: script.to_path_buf(),
            functional: functional.clone(),
            slice_timing,
            text: text.clone(),
        });

        if let Some(needle) = &self.fail_on {
            if functional.display().to_string().contains(needle.as_str()) {
                return Err(ToolkitError::Exit {
                    program: "run_spm12.sh".to_string(),
                    code: 1,
                    stderr: "Item 'Session': No value specified.".to_string(),
                });
            }
        }

        let info = VolumeInfo::read(&functional).unwrap();
        let volumes = info.num_volumes();
        let shape: Vec<u16> = info.shape.iter().map(|d| *d as u16).collect();

        let stem = functional.file_stem().unwrap().to_string_lossy().into_owned();
        write_nifti(&prefixed(&functional, "mean"), &shape[..3], 0.0, |i| i as f32);

        // Small drift in x translation and yaw
        let rp: String = (0..volumes)
            .map(|t| {
                format!(
                    "  {:e}  0.000000e+00  0.000000e+00  0.000000e+00  0.000000e+00  {:e}\n",
                    t as f64 * 0.1,
                    t as f64 * 0.001
                )
            })
            .collect();
        std::fs::write(work_dir.join(format!("rp_{}.txt", stem)), rp).unwrap();

        let mut current = functional.clone();
        if slice_timing {
            current = prefixed(&current, "a");
            write_nifti(&current, &shape, 2.0, |i| i as f32);
        }
        current = prefixed(&current, "w");
        write_nifti(&current, &[5, 6, 4, volumes as u16], 2.0, |i| (i % 23) as f32);
        if !self.omit_outputs {
            let smoothed = prefixed(&current, "s");
            write_nifti(&smoothed, &[5, 6, 4, volumes as u16], 2.0, |i| (i % 7) as f32);
        }

        Ok(ProcessOutput::new("Done    'Smooth'", ""))
    }
}

/// Process runner standing in for dcm2niix; the BIDS validator is "missing"
#[derive(Clone, Default)]
pub struct FakeTools {
    pub conversions: Arc<Mutex<Vec<PathBuf>>>,
}

#[async_trait]
impl ProcessRunner for FakeTools {
    async fn run(
        &self,
        program: &str,
        args: &[String],
        _cwd: Option<&Path>,
    ) -> Result<ProcessOutput, ToolkitError> {
        if program != "dcm2niix" {
            return Err(ToolkitError::Spawn {
                program: program.to_string(),
                source: std::io::Error::new(std::io::ErrorKind::NotFound, "not installed"),
            });
        }
        let value = |flag: &str| {
            let pos = args.iter().position(|a| a == flag).unwrap();
            args[pos + 1].clone()
        };
        let out_dir = PathBuf::from(value("-o"));
        let name = value("-f");
        let series = PathBuf::from(args.last().unwrap());

        write_bold(&out_dir.join(format!("{}.nii", name)), 4);
        std::fs::write(out_dir.join(format!("{}.json", name)), "{}").unwrap();
        self.conversions.lock().unwrap().push(series);
        Ok(ProcessOutput::default())
    }
}

/// Working area for one scenario
pub struct Workspace {
    pub dir: TempDir,
}

impl Workspace {
    pub fn new() -> Self {
        Self {
            dir: tempfile::tempdir().unwrap(),
        }
    }

    pub fn data(&self) -> PathBuf {
        self.dir.path().join("data")
    }

    pub fn out(&self) -> PathBuf {
        self.dir.path().join("out")
    }

    pub fn template(&self) -> PathBuf {
        self.dir.path().join("tpm/TPM.nii")
    }

    /// Adapter config pointing at a small fake template
    pub fn config(&self) -> AdapterConfig {
        write_nifti(&self.template(), &[6, 7, 5, 2], 0.0, |_| 0.5);
        AdapterConfig {
            tpm_path: self.template(),
            ..AdapterConfig::default()
        }
    }

    pub fn request(&self, input: serde_json::Value) -> ComputationRequest {
        let json = serde_json::json!({
            "state": {
                "baseDirectory": self.data(),
                "outputDirectory": self.out(),
            },
            "input": input,
        });
        ComputationRequest::from_json(&json.to_string()).unwrap()
    }
}

/// Result of running the engine on a request
pub struct ScenarioResult {
    pub response: ComputationResponse,
    pub events: Vec<ExecutionEvent>,
    pub batches: Vec<RecordedBatch>,
    pub conversions: Vec<PathBuf>,
}

/// Run the engine with the mock toolkit and fake tools
pub async fn run_scenario(
    workspace: &Workspace,
    toolkit: MockToolkit,
    input: serde_json::Value,
) -> ScenarioResult {
    let tools = FakeTools::default();
    let mut engine =
        PipelineEngine::new(toolkit.clone(), Arc::new(tools.clone()), workspace.config());

    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = events.clone();
    engine.add_event_handler(move |event| sink.lock().unwrap().push(event));

    let response = engine
        .run(&workspace.request(input))
        .await
        .expect("engine run should not abort");

    let events = events.lock().unwrap().clone();
    let conversions = tools.conversions.lock().unwrap().clone();
    ScenarioResult {
        response,
        events,
        batches: toolkit.recorded(),
        conversions,
    }
}

/// Names inside a zip archive, sorted
pub fn archive_names(path: &Path) -> Vec<String> {
    let archive = zip::ZipArchive::new(std::fs::File::open(path).unwrap()).unwrap();
    let mut names: Vec<String> = archive.file_names().map(String::from).collect();
    names.sort();
    names
}

pub fn assert_completed_response(response: &ComputationResponse, expected_message: &str) {
    assert!(response.success);
    assert_eq!(response.output.message, expected_message);
    let archive = response
        .output
        .download_outputs
        .as_ref()
        .expect("completed run has an archive");
    assert!(Path::new(archive).is_file(), "archive {} exists", archive);
    let display = response.output.display.as_ref().expect("completed run has a display");
    assert!(!display.is_empty());
}

pub fn assert_message_only(response: &ComputationResponse, contains: &str) {
    assert!(response.success);
    assert!(
        response.output.message.contains(contains),
        "message {:?} should contain {:?}",
        response.output.message,
        contains
    );
    assert!(response.output.download_outputs.is_none());
    assert!(response.output.display.is_none());
}
