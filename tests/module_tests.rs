// ABOUTME: Module resolution tests over real on-disk module graphs

use std::fs;
use std::path::Path;

use serial_test::serial;
use tempfile::TempDir;

use numfu::error::ErrorKind;
use numfu::modules::encode_tree_file;
use numfu::Interpreter;

/// Write a module graph into a scratch directory and run the entry file.
fn run_project(files: &[(&str, &str)], entry: &str) -> Result<Vec<String>, numfu::NumFuError> {
    let dir = TempDir::new().expect("tempdir");
    write_files(dir.path(), files);
    run_entry(dir.path(), entry)
}

fn write_files(root: &Path, files: &[(&str, &str)]) {
    for (name, contents) in files {
        let path = root.join(name);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).expect("mkdir");
        }
        fs::write(path, contents).expect("write module");
    }
}

fn run_entry(root: &Path, entry: &str) -> Result<Vec<String>, numfu::NumFuError> {
    let entry_path = root.join(entry);
    let code = fs::read_to_string(&entry_path).expect("read entry");
    let mut interp = Interpreter::with_capture(15, 10000, None);
    interp.run_source(&code, &entry_path.display().to_string(), false)
}

#[test]
#[serial]
fn test_file_import() {
    let results = run_project(
        &[
            ("util.nfu", "let double = {x -> x * 2}\nexport double"),
            ("main.nfu", "from util import double\ndouble(21)"),
        ],
        "main.nfu",
    )
    .expect("run");
    assert_eq!(results, vec!["42"]);
}

#[test]
#[serial]
fn test_whole_module_import_uses_stem_prefix() {
    let results = run_project(
        &[
            ("util.nfu", "let triple = {x -> x * 3}\nexport triple"),
            ("main.nfu", "import util\nutil.triple(5)"),
        ],
        "main.nfu",
    )
    .expect("run");
    assert_eq!(results, vec!["15"]);
}

#[test]
#[serial]
fn test_star_import() {
    let results = run_project(
        &[
            ("util.nfu", "let a = 1\nlet b = 2\nexport a, b"),
            ("main.nfu", "from util import *\na + b"),
        ],
        "main.nfu",
    )
    .expect("run");
    assert_eq!(results, vec!["3"]);
}

#[test]
#[serial]
fn test_folder_import_via_index() {
    let results = run_project(
        &[
            ("lib/index.nfu", "let answer = 42\nexport answer"),
            ("main.nfu", "from lib import answer\nanswer"),
        ],
        "main.nfu",
    )
    .expect("run");
    assert_eq!(results, vec!["42"]);
}

#[test]
#[serial]
fn test_file_takes_precedence_over_folder() {
    let results = run_project(
        &[
            ("lib.nfu", "let origin = \"file\"\nexport origin"),
            ("lib/index.nfu", "let origin = \"folder\"\nexport origin"),
            ("main.nfu", "from lib import origin\norigin"),
        ],
        "main.nfu",
    )
    .expect("run");
    assert_eq!(results, vec!["file"]);
}

#[test]
#[serial]
fn test_import_cycle_detected() {
    let err = run_project(
        &[
            ("a.nfu", "import b\nlet x = 1\nexport x"),
            ("b.nfu", "import a\nlet y = 2\nexport y"),
            ("main.nfu", "import a\na.x"),
        ],
        "main.nfu",
    )
    .expect_err("cycle");
    assert_eq!(err.kind, ErrorKind::Import);
    assert!(err.message.contains("Circular import"), "{}", err.message);
    assert!(err.message.contains("->"), "{}", err.message);
}

#[test]
#[serial]
fn test_unknown_import_lists_exports() {
    let err = run_project(
        &[
            ("util.nfu", "let a = 1\nlet b = 2\nexport a, b"),
            ("main.nfu", "from util import ghost"),
        ],
        "main.nfu",
    )
    .expect_err("unknown export");
    assert_eq!(err.kind, ErrorKind::Import);
    assert!(err.message.contains("ghost"), "{}", err.message);
    assert!(err.message.contains("a, b"), "{}", err.message);
}

#[test]
#[serial]
fn test_export_requires_declaration() {
    let err = run_project(
        &[("main.nfu", "export phantom")],
        "main.nfu",
    )
    .expect_err("undeclared export");
    assert_eq!(err.kind, ErrorKind::Name);
}

#[test]
#[serial]
fn test_transitive_imports() {
    let results = run_project(
        &[
            ("base.nfu", "let one = 1\nexport one"),
            (
                "middle.nfu",
                "from base import one\nlet two = one + 1\nexport two",
            ),
            ("main.nfu", "from middle import two\ntwo * 10"),
        ],
        "main.nfu",
    )
    .expect("run");
    assert_eq!(results, vec!["20"]);
}

#[test]
#[serial]
fn test_module_bodies_run_at_load() {
    let dir = TempDir::new().expect("tempdir");
    write_files(
        dir.path(),
        &[
            ("noisy.nfu", "println(\"loading\")\nlet v = 1\nexport v"),
            ("main.nfu", "from noisy import v\nv"),
        ],
    );
    let entry_path = dir.path().join("main.nfu");
    let code = fs::read_to_string(&entry_path).expect("read entry");
    let mut interp = Interpreter::with_capture(15, 10000, None);
    let results = interp
        .run_source(&code, &entry_path.display().to_string(), false)
        .expect("run");
    assert_eq!(results, vec!["1"]);
    assert_eq!(interp.captured_output().unwrap(), "loading\n");
}

#[test]
#[serial]
fn test_imported_closure_sees_its_module_constants() {
    let results = run_project(
        &[
            (
                "util.nfu",
                "let factor = 3\nlet scale = {x -> x * factor}\nexport scale",
            ),
            ("main.nfu", "from util import scale\nscale(7)"),
        ],
        "main.nfu",
    )
    .expect("run");
    assert_eq!(results, vec!["21"]);
}

#[test]
#[serial]
fn test_module_loaded_once() {
    // Both importers share one copy of the diamond dependency; its body
    // runs a single time.
    let dir = TempDir::new().expect("tempdir");
    write_files(
        dir.path(),
        &[
            ("shared.nfu", "println(\"shared once\")\nlet s = 1\nexport s"),
            ("left.nfu", "from shared import s\nlet l = s\nexport l"),
            ("right.nfu", "from shared import s\nlet r = s\nexport r"),
            (
                "main.nfu",
                "from left import l\nfrom right import r\nl + r",
            ),
        ],
    );
    let entry_path = dir.path().join("main.nfu");
    let code = fs::read_to_string(&entry_path).expect("read entry");
    let mut interp = Interpreter::with_capture(15, 10000, None);
    let results = interp
        .run_source(&code, &entry_path.display().to_string(), false)
        .expect("run");
    assert_eq!(results, vec!["2"]);
    assert_eq!(interp.captured_output().unwrap(), "shared once\n");
}

#[test]
#[serial]
fn test_tree_file_loading() {
    let dir = TempDir::new().expect("tempdir");
    let tree = numfu::parser::parse("let v = 99\nexport v").expect("parse");
    let encoded = encode_tree_file(&tree).expect("encode");
    fs::write(dir.path().join("pre.nfu"), encoded).expect("write tree file");
    write_files(dir.path(), &[("main.nfu", "from pre import v\nv")]);
    let results = run_entry(dir.path(), "main.nfu").expect("run");
    assert_eq!(results, vec!["99"]);
}

#[test]
#[serial]
fn test_nested_path_import() {
    let results = run_project(
        &[
            ("lib/math_helpers.nfu", "let twice = {x -> x + x}\nexport twice"),
            ("main.nfu", "from lib/math_helpers import twice\ntwice(8)"),
        ],
        "main.nfu",
    )
    .expect("run");
    assert_eq!(results, vec!["16"]);
}

#[test]
#[serial]
fn test_invalid_module_names_rejected() {
    for bad in ["import /abs", "import ~home", "import has.ext"] {
        let err = run_project(&[("main.nfu", bad)], "main.nfu").expect_err(bad);
        assert_eq!(err.kind, ErrorKind::Import, "{bad}");
    }
}

#[test]
#[serial]
fn test_missing_module_error() {
    let err = run_project(&[("main.nfu", "import nowhere")], "main.nfu").expect_err("missing");
    assert_eq!(err.kind, ErrorKind::Import);
    assert!(err.message.contains("nowhere"), "{}", err.message);
}

#[test]
#[serial]
fn test_stdlib_groups_via_modules() {
    assert_eq!(
        run_project(&[("main.nfu", "import math\nmath.atan2(0, 1)")], "main.nfu").expect("run"),
        vec!["0"]
    );
    assert_eq!(
        run_project(
            &[("main.nfu", "from types import typeof\ntypeof(1)")],
            "main.nfu"
        )
        .expect("run"),
        vec!["Number"]
    );
    assert_eq!(
        run_project(
            &[(
                "main.nfu",
                "from random import *\nseed(42)\nlet r = random() in r >= 0 && r < 1"
            )],
            "main.nfu"
        )
        .expect("run"),
        vec!["true"]
    );
}
