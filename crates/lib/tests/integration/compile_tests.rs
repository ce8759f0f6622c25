use std::fs;
use std::path::PathBuf;

use multipack_lib::cache::PruneStats;
use multipack_lib::chain::{ChainError, ChainOutcome, ReleaseDescriptor, Runner};
use multipack_lib::compile::{StageOptions, compile, stage_with};
use multipack_lib::log::StepLog;
use multipack_lib::staging::{StagingArea, StagingError};
use multipack_lib::{StageError, exit_codes};
use serial_test::serial;

use super::common::{Fixture, release_web};

fn options(fixture: &Fixture) -> StageOptions {
  let mut options = StageOptions::new(fixture.build_dir(), fixture.cache_dir());
  options.temp_root = fixture.tmp_dir();
  options.buildpacks_dir = fixture.buildpacks_dir();
  options.release_output = fixture.temp.path().join("release.yml");
  options
}

fn scratch_dirs(fixture: &Fixture) -> Vec<PathBuf> {
  match fs::read_dir(fixture.tmp_dir()) {
    Ok(entries) => entries.map(|e| e.unwrap().path()).collect(),
    Err(_) => Vec::new(),
  }
}

fn two_buildpack_app(fixture: &Fixture) {
  fixture.buildpack(
    "go",
    &[("supply", "mkdir -p \"$4/$3/bin\" && echo go > \"$4/$3/bin/go\"")],
  );
  fixture.buildpack(
    "ruby",
    &[
      ("compile", "ls \"$4/0/bin/go\" > \"$1/saw-go\""),
      ("release", &release_web("bundle exec rackup")),
    ],
  );
  fixture.write_app_file("multi-buildpack.yml", "buildpacks:\n  - go\n  - ruby\n");
  fixture.write_app_file("config.ru", "run App\n");
}

#[tokio::test]
#[serial]
async fn compile_stages_app_in_place() {
  let fixture = Fixture::new();
  two_buildpack_app(&fixture);
  let mut options = options(&fixture);
  options.droplet = Some(fixture.temp.path().join("out").join("droplet.tgz"));
  options.build_artifacts_cache = Some(fixture.temp.path().join("out").join("cache.tgz"));

  let (log, output) = StepLog::capture();
  let report = compile(&options, &log).await.unwrap();

  let build = fixture.build_dir();
  assert!(build.join("config.ru").is_file());
  assert!(build.join("saw-go").is_file());
  assert_eq!(report.deps_dir, build.join(".deps"));
  assert!(build.join(".deps").join("0").join("bin").join("go").is_file());
  assert!(build.join(".profile.d").join("000_multi-buildpack.sh").is_file());

  assert_eq!(
    fs::read_to_string(&options.release_output).unwrap(),
    "default_process_types:\n  web: bundle exec rackup\n"
  );
  assert_eq!(report.release.web(), Some("bundle exec rackup"));
  assert!(report.droplet.is_some_and(|d| d.path.is_file()));
  assert!(report.build_artifacts_cache.is_some_and(|c| c.path.is_file()));

  assert!(scratch_dirs(&fixture).is_empty(), "left behind: {:?}", scratch_dirs(&fixture));
  assert!(output.contents().contains("-----> Running supply for buildpack go"));
}

#[tokio::test]
#[serial]
async fn failed_supply_restores_build_dir() {
  let fixture = Fixture::new();
  fixture.buildpack("broken", &[("supply", "touch \"$1/partial\"; exit 3")]);
  fixture.buildpack("ruby", &[("compile", "true"), ("release", &release_web("run"))]);
  fixture.write_app_file("multi-buildpack.yml", "buildpacks:\n  - broken\n  - ruby\n");

  let options = options(&fixture);
  let (log, output) = StepLog::capture();
  let err = compile(&options, &log).await.unwrap_err();

  assert_eq!(err.exit_code(), exit_codes::SUPPLY);
  assert!(fixture.build_dir().join("multi-buildpack.yml").is_file());
  assert!(fixture.build_dir().join("partial").is_file());
  assert!(!fixture.build_dir().join(".deps").exists());
  assert!(!options.release_output.exists());
  assert!(scratch_dirs(&fixture).is_empty());
  assert!(output.contents().contains("**ERROR** Unable to run all buildpacks"));
}

#[tokio::test]
#[serial]
async fn missing_config_leaves_build_dir_alone() {
  let fixture = Fixture::new();
  fixture.write_app_file("index.html", "hi");

  let err = compile(&options(&fixture), &StepLog::sink()).await.unwrap_err();

  assert_eq!(err.exit_code(), exit_codes::NO_CONFIG);
  assert!(fixture.build_dir().join("index.html").is_file());
  assert!(!fixture.tmp_dir().exists());
}

#[tokio::test]
#[serial]
async fn malformed_config_exit_code() {
  let fixture = Fixture::new();
  fixture.write_app_file("multi-buildpack.yml", "buildpacks: [unclosed\n");

  let err = compile(&options(&fixture), &StepLog::sink()).await.unwrap_err();
  assert_eq!(err.exit_code(), exit_codes::MALFORMED_CONFIG);
}

#[tokio::test]
#[serial]
async fn failed_download_stops_before_any_supply() {
  let fixture = Fixture::new();
  let marker = fixture.temp.path().join("supply-ran");
  fixture.buildpack("recorder", &[("supply", &format!("touch '{}'", marker.display()))]);
  fixture.buildpack("ruby", &[("compile", "true"), ("release", &release_web("run"))]);
  fixture.write_app_file(
    "multi-buildpack.yml",
    "buildpacks:\n  - http://127.0.0.1:1/missing-buildpack.zip\n  - recorder\n  - ruby\n",
  );

  let options = options(&fixture);
  let (log, output) = StepLog::capture();
  let err = compile(&options, &log).await.unwrap_err();

  assert!(matches!(err, StageError::Chain(ChainError::Source(_))));
  assert_eq!(err.exit_code(), exit_codes::GENERIC);
  assert!(!marker.exists());
  assert!(!output.contents().contains("Running supply"));
  assert!(fixture.build_dir().join("multi-buildpack.yml").is_file());
  assert!(!options.release_output.exists());
  assert!(scratch_dirs(&fixture).is_empty());
}

/// Runner that only touches the deps directory it was handed.
#[derive(Default)]
struct FakeRunner {
  deps_root: PathBuf,
  staging_root: PathBuf,
  create_deps: bool,
  report_deps: bool,
  fail: bool,
  /// Occupy this path so the app cannot be moved back.
  squat: Option<PathBuf>,
}

impl Runner for FakeRunner {
  async fn run(&self) -> Result<ChainOutcome, ChainError> {
    if self.fail {
      return Err(ChainError::DetectNone);
    }
    if self.create_deps {
      fs::create_dir_all(self.deps_root.join("0")).unwrap();
    }
    if let Some(path) = &self.squat {
      fs::write(path, "squatter").unwrap();
    }
    let staging_info = self.staging_root.join("staging_info.yml");
    fs::write(&staging_info, "{\"detected_buildpack\":\"\",\"start_command\":\"web-cmd\"}\n").unwrap();

    Ok(ChainOutcome {
      staging_info,
      deps_dir: self.report_deps.then(|| self.deps_root.clone()),
      release: ReleaseDescriptor::default(),
      buildpack_key: String::new(),
      detect_output: String::new(),
      cache_prune: PruneStats::default(),
    })
  }
}

fn fake(area: &StagingArea) -> FakeRunner {
  FakeRunner {
    deps_root: area.deps_dir(),
    staging_root: area.staging_root().to_path_buf(),
    create_deps: true,
    ..FakeRunner::default()
  }
}

#[tokio::test]
#[serial]
async fn unreported_deps_dir_is_found_by_snapshot() {
  let fixture = Fixture::new();
  fixture.write_app_file("app.py", "print(1)");
  let options = options(&fixture);

  let area = StagingArea::prepare(&options.build_dir, &options.temp_root, StepLog::sink()).unwrap();
  let runner = fake(&area);
  let report = stage_with(area, &runner, &options, &StepLog::sink()).await.unwrap();

  assert!(report.deps_dir.join("0").is_dir());
  assert_eq!(report.release.web(), Some("web-cmd"));
  assert!(fixture.build_dir().join("app.py").is_file());
}

#[tokio::test]
#[serial]
async fn runner_failure_abandons_staging_area() {
  let fixture = Fixture::new();
  fixture.write_app_file("app.py", "print(1)");
  let options = options(&fixture);

  let area = StagingArea::prepare(&options.build_dir, &options.temp_root, StepLog::sink()).unwrap();
  let runner = FakeRunner {
    report_deps: true,
    fail: true,
    ..fake(&area)
  };
  let err = stage_with(area, &runner, &options, &StepLog::sink()).await.unwrap_err();

  assert!(matches!(err, StageError::Chain(ChainError::DetectNone)));
  assert!(fixture.build_dir().join("app.py").is_file());
  assert!(scratch_dirs(&fixture).is_empty());
}

#[tokio::test]
#[serial]
async fn missing_deps_dir_writes_no_outputs() {
  let fixture = Fixture::new();
  fixture.write_app_file("app.py", "print(1)");
  let mut options = options(&fixture);
  options.droplet = Some(fixture.temp.path().join("out").join("droplet.tgz"));

  let area = StagingArea::prepare(&options.build_dir, &options.temp_root, StepLog::sink()).unwrap();
  let runner = FakeRunner {
    create_deps: false,
    ..fake(&area)
  };
  let err = stage_with(area, &runner, &options, &StepLog::sink()).await.unwrap_err();

  assert!(matches!(err, StageError::Staging(StagingError::DepsDirNotFound)));
  assert!(!options.release_output.exists());
  assert!(!fixture.temp.path().join("out").join("droplet.tgz").exists());
  assert!(fixture.build_dir().join("app.py").is_file());
}

#[tokio::test]
#[serial]
async fn failed_droplet_removes_release_descriptor() {
  let fixture = Fixture::new();
  fixture.write_app_file("app.py", "print(1)");
  let mut options = options(&fixture);
  // A directory at the droplet path cannot be replaced by the archive.
  let droplet = fixture.temp.path().join("out").join("droplet.tgz");
  fs::create_dir_all(&droplet).unwrap();
  options.droplet = Some(droplet.clone());

  let area = StagingArea::prepare(&options.build_dir, &options.temp_root, StepLog::sink()).unwrap();
  let runner = fake(&area);
  let err = stage_with(area, &runner, &options, &StepLog::sink()).await.unwrap_err();

  assert!(matches!(err, StageError::Assembly(_)));
  assert!(!options.release_output.exists());
  assert!(droplet.is_dir());
  assert_eq!(fs::read_dir(fixture.temp.path().join("out")).unwrap().count(), 1);
  assert!(fixture.build_dir().join("app.py").is_file());
}

#[tokio::test]
#[serial]
async fn failed_restore_discards_outputs_and_keeps_app() {
  let fixture = Fixture::new();
  fixture.write_app_file("app.py", "print(1)");
  let mut options = options(&fixture);
  let droplet = fixture.temp.path().join("out").join("droplet.tgz");
  options.droplet = Some(droplet.clone());

  let area = StagingArea::prepare(&options.build_dir, &options.temp_root, StepLog::sink()).unwrap();
  let app = area.app_dir();
  let runner = FakeRunner {
    report_deps: true,
    squat: Some(fixture.build_dir()),
    ..fake(&area)
  };
  let err = stage_with(area, &runner, &options, &StepLog::sink()).await.unwrap_err();

  assert!(matches!(err, StageError::Staging(StagingError::Relocate { .. })));
  assert!(!options.release_output.exists());
  assert!(!droplet.exists());
  assert!(app.join("app.py").is_file());
}
