//! Internal testing utilities for the rankc crates.

use std::fmt::Debug;
use std::fs;
use std::io;
use std::panic::{RefUnwindSafe, UnwindSafe};
use std::path::Path;

/// Run a table of test cases, reporting every failing case rather than
/// stopping at the first.
///
/// Declare a `Case` struct deriving `Debug`, build a collection of cases and
/// call `cases.test_each(|case| ...)`. Each case is run under
/// [`catch_unwind`](std::panic::catch_unwind). Once all cases have run, the
/// call panics with the count and debug representations of the failures, if
/// there were any.
///
/// ```
/// use rankc_testing::TestCases;
///
/// #[derive(Debug)]
/// struct Case<'a> {
///     name: &'a str,
///     len: usize,
/// }
///
/// let cases = [
///     Case { name: "d0", len: 2 },
///     Case { name: "default", len: 7 },
/// ];
///
/// cases.test_each(|case| {
///     assert_eq!(case.name.len(), case.len);
/// });
/// ```
///
/// Cases and values captured by the test function must be unwind safe. Wrap
/// values that are not (eg. types with interior mutability) in
/// [`AssertUnwindSafe`](std::panic::AssertUnwindSafe), or create them inside
/// the test function.
pub trait TestCases {
    type Case;

    /// Call `test` with a reference to each case.
    fn test_each(self, test: impl Fn(&Self::Case) + RefUnwindSafe)
    where
        Self::Case: Debug + RefUnwindSafe;

    /// Call `test` with each case by value.
    ///
    /// The debug representation of each case is captured before the call, so
    /// it can be reported if the case fails.
    fn test_each_value(self, test: impl Fn(Self::Case) + RefUnwindSafe)
    where
        Self::Case: Debug + UnwindSafe;
}

impl<I: IntoIterator> TestCases for I {
    type Case = I::Item;

    fn test_each(self, test: impl Fn(&I::Item) + RefUnwindSafe)
    where
        Self::Case: Debug + RefUnwindSafe,
    {
        let failures: Vec<String> = self
            .into_iter()
            .filter_map(|case| {
                let result = std::panic::catch_unwind(|| test(&case));
                result.is_err().then(|| format!("{:?}", case))
            })
            .collect();
        report_failures(&failures);
    }

    fn test_each_value(self, test: impl Fn(I::Item) + RefUnwindSafe)
    where
        Self::Case: Debug + UnwindSafe,
    {
        let test = &test;
        let failures: Vec<String> = self
            .into_iter()
            .filter_map(|case| {
                let case_str = format!("{:?}", case);
                let result = std::panic::catch_unwind(move || test(case));
                result.is_err().then_some(case_str)
            })
            .collect();
        report_failures(&failures);
    }
}

fn report_failures(failures: &[String]) {
    assert!(
        failures.is_empty(),
        "{} test cases failed: {:?}",
        failures.len(),
        failures
    );
}

/// Recursively copy the directory `src` to `dest`, creating `dest` if
/// needed.
///
/// Used to simulate deploying a copy of an application directory, eg. on a
/// machine which has the generated artifacts but not the source models.
pub fn copy_tree(src: &Path, dest: &Path) -> io::Result<()> {
    fs::create_dir_all(dest)?;
    for entry in fs::read_dir(src)? {
        let entry = entry?;
        let target = dest.join(entry.file_name());
        if entry.file_type()?.is_dir() {
            copy_tree(&entry.path(), &target)?;
        } else {
            fs::copy(entry.path(), &target)?;
        }
    }
    Ok(())
}

/// Return the relative paths of all files under `root`, sorted.
pub fn list_files(root: &Path) -> io::Result<Vec<String>> {
    fn visit(root: &Path, dir: &Path, out: &mut Vec<String>) -> io::Result<()> {
        for entry in fs::read_dir(dir)? {
            let path = entry?.path();
            if path.is_dir() {
                visit(root, &path, out)?;
            } else if let Ok(rel) = path.strip_prefix(root) {
                out.push(rel.to_string_lossy().replace('\\', "/"));
            }
        }
        Ok(())
    }

    let mut files = Vec::new();
    if root.exists() {
        visit(root, root, &mut files)?;
    }
    files.sort();
    Ok(files)
}
