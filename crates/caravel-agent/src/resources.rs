//! ---
//! cvl_section: "04-agent"
//! cvl_subsection: "module"
//! cvl_type: "source"
//! cvl_scope: "code"
//! cvl_description: "On-disk resource layout for deployed instances."
//! cvl_version: "v0.1.0"
//! cvl_owner: "tbd"
//! ---
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Context;
use walkdir::WalkDir;

/// On-disk resource layout for deployed instances.
///
/// Each instance gets a working directory under
/// `<work_dir>/<application>/<instance-path>`, seeded with the recipe files
/// shipped in the application directory under `graph/<component>/`. The
/// lifecycle machine treats this layer as opaque.
#[derive(Debug, Clone)]
pub struct InstanceResources {
    application_directory: PathBuf,
    work_directory: PathBuf,
}

impl InstanceResources {
    pub fn new(
        application_directory: impl Into<PathBuf>,
        work_directory: impl Into<PathBuf>,
    ) -> Self {
        Self {
            application_directory: application_directory.into(),
            work_directory: work_directory.into(),
        }
    }

    /// Working directory of one instance.
    pub fn instance_directory(&self, application: &str, instance_path: &str) -> PathBuf {
        let mut dir = self.work_directory.join(application);
        for segment in instance_path.split('/').filter(|s| !s.is_empty()) {
            dir.push(segment);
        }
        dir
    }

    fn component_directory(&self, component: &str) -> PathBuf {
        self.application_directory.join("graph").join(component)
    }

    /// Seed the instance working directory with the component's recipe files.
    ///
    /// Components without shipped resources still get an empty directory so
    /// plugins always find a place to work in.
    pub fn copy_instance_resources(
        &self,
        application: &str,
        instance_path: &str,
        component: &str,
    ) -> anyhow::Result<()> {
        let destination = self.instance_directory(application, instance_path);
        fs::create_dir_all(&destination)
            .with_context(|| format!("creating {}", destination.display()))?;
        let source = self.component_directory(component);
        if !source.is_dir() {
            return Ok(());
        }
        copy_tree(&source, &destination)
            .with_context(|| format!("copying resources of component {}", component))
    }

    /// Remove the instance working directory, if it exists.
    pub fn delete_instance_resources(
        &self,
        application: &str,
        instance_path: &str,
    ) -> anyhow::Result<()> {
        let directory = self.instance_directory(application, instance_path);
        if directory.exists() {
            fs::remove_dir_all(&directory)
                .with_context(|| format!("removing {}", directory.display()))?;
        }
        Ok(())
    }
}

fn copy_tree(source: &Path, destination: &Path) -> anyhow::Result<()> {
    for entry in WalkDir::new(source) {
        let entry = entry?;
        let relative = entry.path().strip_prefix(source)?;
        if relative.as_os_str().is_empty() {
            continue;
        }
        let target = destination.join(relative);
        if entry.file_type().is_dir() {
            fs::create_dir_all(&target)
                .with_context(|| format!("creating {}", target.display()))?;
        } else {
            fs::copy(entry.path(), &target)
                .with_context(|| format!("copying to {}", target.display()))?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn copy_then_delete_round_trip() {
        let app_dir = tempfile::tempdir().expect("app dir");
        let work_dir = tempfile::tempdir().expect("work dir");
        let recipe = app_dir.path().join("graph").join("mysql").join("scripts");
        fs::create_dir_all(&recipe).expect("recipe dir");
        fs::write(recipe.join("deploy.sh"), "#!/bin/sh\n").expect("recipe file");

        let resources = InstanceResources::new(app_dir.path(), work_dir.path());
        resources
            .copy_instance_resources("lamp", "/vm/mysql", "mysql")
            .expect("copy succeeds");

        let copied = resources
            .instance_directory("lamp", "/vm/mysql")
            .join("scripts")
            .join("deploy.sh");
        assert!(copied.is_file());

        resources
            .delete_instance_resources("lamp", "/vm/mysql")
            .expect("delete succeeds");
        assert!(!resources.instance_directory("lamp", "/vm/mysql").exists());
    }

    #[test]
    fn components_without_resources_still_get_a_directory() {
        let app_dir = tempfile::tempdir().expect("app dir");
        let work_dir = tempfile::tempdir().expect("work dir");
        let resources = InstanceResources::new(app_dir.path(), work_dir.path());
        resources
            .copy_instance_resources("lamp", "/vm", "vm")
            .expect("copy succeeds");
        assert!(resources.instance_directory("lamp", "/vm").is_dir());
    }
}
