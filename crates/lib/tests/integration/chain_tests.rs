use std::fs;

use multipack_lib::chain::{ChainError, Runner, Stage, StagingInfo};
use multipack_lib::config::ChainConfig;
use multipack_lib::exit_codes;
use serial_test::serial;

use super::common::{Fixture, release_web};

const SUPPLY_RECORD: &str = r#"echo "$(basename "$(dirname "$(dirname "$0")")")" >> "$1/order"
echo "$2" > "$4/$3/slot"
touch "$4/$3/supplied""#;

const COMPILE_OK: &str = "touch \"$1/compiled\"";

fn staging_info(fixture: &Fixture) -> StagingInfo {
  serde_json::from_str(&fs::read_to_string(fixture.staging_info()).unwrap()).unwrap()
}

#[tokio::test]
#[serial]
async fn supply_buildpacks_run_in_order_into_numbered_deps_dirs() {
  let fixture = Fixture::new();
  fixture.buildpack("first", &[("supply", SUPPLY_RECORD)]);
  fixture.buildpack("second", &[("supply", SUPPLY_RECORD)]);
  fixture.buildpack("last", &[("compile", COMPILE_OK), ("release", &release_web("ruby app.rb"))]);

  let chain = ChainConfig::new(["first", "second", "last"]);
  let (runner, _output) = fixture.runner(chain, true);
  let outcome = runner.run().await.unwrap();

  assert_eq!(fs::read_to_string(fixture.build_dir().join("order")).unwrap(), "first\nsecond\n");
  assert!(fixture.deps_root().join("0").join("supplied").is_file());
  assert!(fixture.deps_root().join("1").join("supplied").is_file());
  assert!(!fixture.deps_root().join("2").exists());
  assert!(fixture.build_dir().join("compiled").is_file());

  let slot = fs::read_to_string(fixture.deps_root().join("0").join("slot")).unwrap();
  assert!(slot.trim().starts_with(fixture.cache_dir().to_str().unwrap()));
  assert_ne!(slot.trim(), fixture.cache_dir().join("primary").to_str().unwrap());

  assert_eq!(outcome.deps_dir, Some(fixture.deps_root()));
  assert_eq!(outcome.release.web(), Some("ruby app.rb"));
  assert_eq!(staging_info(&fixture).start_command, "ruby app.rb");
  assert_eq!(
    runner.stages(),
    vec![
      Stage::Init,
      Stage::Downloading,
      Stage::CacheClean,
      Stage::Supply(0),
      Stage::Supply(1),
      Stage::SkipDetect,
      Stage::Compile,
      Stage::ProcfileRead,
      Stage::Release,
      Stage::Done,
    ]
  );
}

#[tokio::test]
#[serial]
async fn deps_indices_are_zero_padded_to_largest_index() {
  let fixture = Fixture::new();
  let mut names = Vec::new();
  for i in 0..11 {
    let name = format!("supply-{}", i);
    fixture.buildpack(&name, &[("supply", "touch \"$4/$3/done\"")]);
    names.push(name);
  }
  fixture.buildpack("last", &[("compile", COMPILE_OK), ("release", &release_web("run"))]);
  names.push("last".to_string());

  let (runner, _output) = fixture.runner(ChainConfig::new(names.iter().map(String::as_str)), true);
  runner.run().await.unwrap();

  let mut dirs: Vec<String> = fs::read_dir(fixture.deps_root())
    .unwrap()
    .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
    .collect();
  dirs.sort();

  let expected: Vec<String> = (0..11).map(|i| format!("{:02}", i)).collect();
  assert_eq!(dirs, expected);
  assert!(fixture.deps_root().join("10").join("done").is_file());
}

#[tokio::test]
#[serial]
async fn failing_supply_stops_the_chain() {
  let fixture = Fixture::new();
  fixture.buildpack("ok", &[("supply", "touch \"$1/ok-ran\"")]);
  fixture.buildpack("broken", &[("supply", "exit 7")]);
  fixture.buildpack("never", &[("supply", "touch \"$1/never-ran\"")]);
  fixture.buildpack("last", &[("compile", COMPILE_OK), ("release", &release_web("run"))]);

  let (runner, _output) = fixture.runner(ChainConfig::new(["ok", "broken", "never", "last"]), true);
  let err = runner.run().await.unwrap_err();

  assert!(matches!(err, ChainError::Supply { ref buildpack, .. } if buildpack == "broken"));
  assert_eq!(err.exit_code(), exit_codes::SUPPLY);
  assert!(fixture.build_dir().join("ok-ran").exists());
  assert!(!fixture.build_dir().join("never-ran").exists());
  assert!(!fixture.build_dir().join("compiled").exists());
  assert_eq!(runner.current_stage(), Stage::Failed);
}

#[tokio::test]
#[serial]
async fn malformed_supply_buildpack_is_a_supply_failure() {
  let fixture = Fixture::new();
  std::fs::create_dir_all(fixture.buildpacks_dir().join("nobin").join("lib")).unwrap();
  fixture.buildpack("last", &[("compile", COMPILE_OK), ("release", &release_web("run"))]);

  let (runner, _output) = fixture.runner(ChainConfig::new(["nobin", "last"]), true);
  let err = runner.run().await.unwrap_err();

  assert_eq!(err.exit_code(), exit_codes::SUPPLY);
  assert!(err.to_string().contains("nobin"));
}

#[tokio::test]
#[serial]
async fn empty_chain_writes_empty_staging_info() {
  let fixture = Fixture::new();

  let (runner, _output) = fixture.runner(ChainConfig::default(), true);
  let outcome = runner.run().await.unwrap();

  assert_eq!(staging_info(&fixture), StagingInfo::default());
  assert!(outcome.release.default_process_types.is_empty());
  assert!(!fixture.tmp_dir().join("downloads").exists());
  assert_eq!(runner.stages(), vec![Stage::Init, Stage::CacheClean, Stage::Done]);
}

#[tokio::test]
#[serial]
async fn empty_chain_still_prunes_cache() {
  let fixture = Fixture::new();
  fs::create_dir_all(fixture.cache_dir().join("old-buildpack").join("gems")).unwrap();
  fs::create_dir_all(fixture.cache_dir().join("primary")).unwrap();

  let (runner, _output) = fixture.runner(ChainConfig::default(), true);
  let outcome = runner.run().await.unwrap();

  assert!(!fixture.cache_dir().join("old-buildpack").exists());
  assert!(fixture.cache_dir().join("primary").is_dir());
  assert_eq!(outcome.cache_prune.removed, 1);
}

#[tokio::test]
#[serial]
async fn compile_receives_primary_cache_empty_arg_and_deps_root() {
  let fixture = Fixture::new();
  fixture.buildpack("supplier", &[("supply", "true")]);
  fixture.buildpack(
    "last",
    &[
      ("compile", r#"printf '%s|%s|%s' "$2" "$3" "$4" > "$1/compile-args""#),
      ("release", &release_web("run")),
    ],
  );

  let (runner, _output) = fixture.runner(ChainConfig::new(["supplier", "last"]), true);
  runner.run().await.unwrap();

  let args = fs::read_to_string(fixture.build_dir().join("compile-args")).unwrap();
  assert_eq!(
    args,
    format!(
      "{}||{}",
      fixture.cache_dir().join("primary").display(),
      fixture.deps_root().display()
    )
  );
}

#[tokio::test]
#[serial]
async fn procfile_replaces_release_process_types() {
  let fixture = Fixture::new();
  fixture.buildpack(
    "last",
    &[
      ("compile", COMPILE_OK),
      (
        "release",
        "printf 'default_process_types:\\n  web: from-buildpack\\n  console: irb\\n'",
      ),
    ],
  );
  fixture.write_app_file("Procfile", "web: bundle exec puma\nworker: sidekiq\n");

  let (runner, _output) = fixture.runner(ChainConfig::new(["last"]), true);
  let outcome = runner.run().await.unwrap();

  let types = &outcome.release.default_process_types;
  assert_eq!(types.len(), 2);
  assert_eq!(types.get("web").map(String::as_str), Some("bundle exec puma"));
  assert_eq!(types.get("worker").map(String::as_str), Some("sidekiq"));
  assert!(!types.contains_key("console"));
  assert_eq!(staging_info(&fixture).start_command, "bundle exec puma");
}

#[tokio::test]
#[serial]
async fn malformed_procfile_fails_after_compile() {
  let fixture = Fixture::new();
  fixture.buildpack("last", &[("compile", COMPILE_OK), ("release", &release_web("run"))]);
  fixture.write_app_file("Procfile", "[not, a, mapping]\n");

  let (runner, _output) = fixture.runner(ChainConfig::new(["last"]), true);
  let err = runner.run().await.unwrap_err();

  assert!(matches!(err, ChainError::Procfile { .. }));
  assert_eq!(err.exit_code(), exit_codes::GENERIC);
  assert!(fixture.build_dir().join("compiled").exists());
}

#[tokio::test]
#[serial]
async fn missing_web_process_warns() {
  let fixture = Fixture::new();
  fixture.buildpack("last", &[("compile", COMPILE_OK), ("release", "echo 'default_process_types: {}'")]);

  let (runner, output) = fixture.runner(ChainConfig::new(["last"]), true);
  runner.run().await.unwrap();

  let log = output.contents();
  assert!(log.contains("**WARNING** No start command specified by buildpack or via Procfile."));
  assert!(log.contains("App will not start unless a command is provided at runtime."));
  assert_eq!(staging_info(&fixture).start_command, "");
}

#[tokio::test]
#[serial]
async fn detect_picks_first_match_and_trims_output() {
  let fixture = Fixture::new();
  fixture.buildpack(
    "supplier",
    &[("supply", "true"), ("detect", "exit 1"), ("compile", "touch \"$1/wrong\"")],
  );
  fixture.buildpack(
    "ruby",
    &[
      ("detect", "printf 'Ruby\\n\\n'"),
      ("compile", COMPILE_OK),
      ("release", &release_web("rackup")),
    ],
  );

  let (runner, _output) = fixture.runner(ChainConfig::new(["supplier", "ruby"]), false);
  let outcome = runner.run().await.unwrap();

  assert_eq!(outcome.detect_output, "Ruby");
  assert_eq!(outcome.buildpack_key, "ruby");
  assert_eq!(staging_info(&fixture).detected_buildpack, "Ruby");
  assert!(fixture.build_dir().join("compiled").exists());
  assert!(!fixture.build_dir().join("wrong").exists());
  assert!(runner.stages().contains(&Stage::Detect));
}

#[tokio::test]
#[serial]
async fn no_detect_match_is_a_detect_failure() {
  let fixture = Fixture::new();
  fixture.buildpack("last", &[("detect", "exit 1"), ("compile", COMPILE_OK)]);

  let (runner, _output) = fixture.runner(ChainConfig::new(["last"]), false);
  let err = runner.run().await.unwrap_err();

  assert!(matches!(err, ChainError::DetectNone));
  assert_eq!(err.exit_code(), exit_codes::DETECT);
  assert!(!fixture.build_dir().join("compiled").exists());
}

#[tokio::test]
#[serial]
async fn compile_and_release_failures_are_classified() {
  let fixture = Fixture::new();
  fixture.buildpack("bad-compile", &[("compile", "exit 1")]);
  let (runner, _output) = fixture.runner(ChainConfig::new(["bad-compile"]), true);
  assert_eq!(runner.run().await.unwrap_err().exit_code(), exit_codes::COMPILE);

  fixture.buildpack("bad-release", &[("compile", COMPILE_OK), ("release", "exit 1")]);
  let (runner, _output) = fixture.runner(ChainConfig::new(["bad-release"]), true);
  assert_eq!(runner.run().await.unwrap_err().exit_code(), exit_codes::RELEASE);

  fixture.buildpack("garbage-release", &[("compile", COMPILE_OK), ("release", "echo '- [unclosed'")]);
  let (runner, _output) = fixture.runner(ChainConfig::new(["garbage-release"]), true);
  let err = runner.run().await.unwrap_err();
  assert!(matches!(err, ChainError::ReleaseOutput { .. }));
  assert_eq!(err.exit_code(), exit_codes::RELEASE);
}

#[tokio::test]
#[serial]
async fn stale_cache_slots_are_pruned_before_running() {
  let fixture = Fixture::new();
  fs::create_dir_all(fixture.cache_dir().join("old-buildpack")).unwrap();
  fs::create_dir_all(fixture.cache_dir().join("primary").join("kept")).unwrap();
  fixture.buildpack("supplier", &[("supply", "true")]);
  fixture.buildpack("last", &[("compile", COMPILE_OK), ("release", &release_web("run"))]);

  let (runner, _output) = fixture.runner(ChainConfig::new(["supplier", "last"]), true);
  let outcome = runner.run().await.unwrap();

  assert!(!fixture.cache_dir().join("old-buildpack").exists());
  assert!(fixture.cache_dir().join("primary").join("kept").exists());
  assert_eq!(outcome.cache_prune.removed_paths, vec![fixture.cache_dir().join("old-buildpack")]);
}

#[tokio::test]
#[serial]
async fn result_metadata_is_written_when_requested() {
  let fixture = Fixture::new();
  fixture.buildpack("last", &[("compile", COMPILE_OK), ("release", &release_web("run"))]);

  let result_path = fixture.temp.path().join("out").join("result.json");
  let mut options = multipack_lib::chain::RunnerOptions::new(fixture.buildpacks_dir());
  options.result_metadata = Some(result_path.clone());
  let runner = multipack_lib::chain::ChainRunner::new(
    fixture.context(ChainConfig::new(["last"])),
    options,
    multipack_lib::log::StepLog::sink(),
  );
  runner.run().await.unwrap();

  let json: serde_json::Value = serde_json::from_str(&fs::read_to_string(result_path).unwrap()).unwrap();
  assert_eq!(json["lifecycle_type"], "buildpack");
  assert_eq!(json["process_types"]["web"], "run");
  assert_eq!(json["lifecycle_metadata"]["buildpack_key"], "last");
}
