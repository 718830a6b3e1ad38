//! Test fixtures - source snippets and project layouts

use indoc::indoc;
use std::fs;
use std::path::{Path, PathBuf};

pub fn simple_module() -> &'static str {
    indoc! {r#"
        export function add(a: number, b: number): number {
            return a + b;
        }
    "#}
}

pub fn component_source() -> &'static str {
    indoc! {r#"
        export const Button = (props: { label: string }) => <button>{props.label}</button>;
    "#}
}

/// tsconfig with a `lib/*` alias rooted at the project directory
pub fn alias_tsconfig() -> &'static str {
    indoc! {r#"
        {
            // aliases used by the fixtures
            "compilerOptions": {
                "baseUrl": ".",
                "paths": {
                    "lib/*": ["./src/lib/*"],
                    "@config": ["./src/config.ts"],
                },
            },
        }
    "#}
}

/// tsconfig whose only alias is rejected
pub fn ambiguous_tsconfig() -> &'static str {
    indoc! {r#"
        {
            "compilerOptions": {
                "baseUrl": ".",
                "paths": { "*": ["./src/*"] }
            }
        }
    "#}
}

/// Write `contents` to `dir/relative`, creating parent directories
pub fn write_file(dir: &Path, relative: &str, contents: &str) -> PathBuf {
    let path = dir.join(relative);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    fs::write(&path, contents).unwrap();
    path
}

/// Project at `dir` with [`alias_tsconfig`] and one source file; returns the source path
pub fn project_with_aliases(dir: &Path) -> PathBuf {
    write_file(dir, "tsconfig.json", alias_tsconfig());
    write_file(dir, "src/lib/math.ts", simple_module())
}
