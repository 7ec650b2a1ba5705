use crate::compilation::{CacheStats, PruneReport, Toolchain};
use crate::pipeline::{BuildFailure, BuildOutput, Diagnostic, ResolvedProject};
use crate::resolver::ModuleOrigin;

/// Print warnings and errors to stderr
pub fn print_diagnostics(diagnostics: &[Diagnostic]) {
    for diagnostic in diagnostics {
        eprintln!("{diagnostic}");
    }
}

pub fn print_build_failure(failure: &BuildFailure) {
    print_diagnostics(&failure.diagnostics);
    let errors = failure.errors().count();
    eprintln!(
        "❌ Build failed during {} with {} error{}",
        failure.stage,
        errors,
        if errors == 1 { "" } else { "s" }
    );
}

pub fn print_build_summary(output: &BuildOutput) {
    print_diagnostics(&output.diagnostics);

    let source = if output.cache_hit { "cache" } else { "toolchain" };
    println!("✅ Built {} ({} bytes, from {})", output.wasm_path.display(), output.wasm.len(), source);
    println!("📄 ABI {} ({} methods)", output.abi_path.display(), output.abi.methods.len());
    for method in &output.abi.methods {
        let params: Vec<String> = method
            .params
            .iter()
            .map(|p| format!("{}: {}", p.name, p.type_tag))
            .collect();
        println!(
            "  • {} {}({}) -> {}",
            method.kind,
            method.name,
            params.join(", "),
            method.returns.as_deref().unwrap_or("null")
        );
    }
    println!("📦 {} frozen modules in {:?}", output.modules.len(), output.duration);
}

pub fn print_dependencies(project: &ResolvedProject) {
    print_diagnostics(&project.diagnostics);

    for module in project.graph.modules() {
        let origin = match &module.origin {
            ModuleOrigin::Local => "local".to_string(),
            ModuleOrigin::Package {
                distribution: Some(dist),
            } => match &dist.raw_version {
                Some(version) => format!("{} {}", dist.name, version),
                None => dist.name.clone(),
            },
            ModuleOrigin::Package { distribution: None } => "package".to_string(),
        };
        println!("{} ({}) {}", module.name, origin, module.path.display());
        let importers = project.graph.importers_of(&module.name);
        if !importers.is_empty() {
            println!("    imported by: {}", importers.join(", "));
        }
        if !module.excluded_imports.is_empty() {
            let excluded: Vec<&str> = module.excluded_imports.iter().map(String::as_str).collect();
            println!("    excluded: {}", excluded.join(", "));
        }
    }
}

pub fn print_dependencies_json(project: &ResolvedProject) -> Result<(), serde_json::Error> {
    let modules: Vec<_> = project
        .graph
        .modules()
        .map(|module| {
            serde_json::json!({
                "module": module,
                "imported_by": project.graph.importers_of(&module.name),
            })
        })
        .collect();
    let json = serde_json::json!({
        "entry": project.graph.entry(),
        "modules": modules,
        "diagnostics": project.diagnostics,
    });
    println!("{}", serde_json::to_string_pretty(&json)?);
    Ok(())
}

pub fn print_cache_stats(stats: &CacheStats) {
    println!("📦 Cache entries: {}", stats.entries);
    println!("🗂️  Blobs: {} ({} bytes)", stats.blobs, stats.blob_bytes);
}

pub fn print_prune_report(report: &PruneReport) {
    println!(
        "🧹 Removed {} entries and {} blobs",
        report.removed_entries, report.removed_blobs
    );
}

pub fn print_toolchain(toolchain: &Toolchain) {
    println!("✅ Toolchain: {}", toolchain.program.display());
    println!("   Version: {}", toolchain.version);
}
