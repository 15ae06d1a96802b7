use crate::action::{Action, ActionSource};
use crate::client::{FetchOutputRequest, JobClient};
use crate::description::{basename, ClientOutputs, PulsarOutputs};
use crate::error::{Result, StagingError};
use crate::mapper::FileActionMapper;
use pulsar_core::constants::outputs::COMMAND_VERSION_FILENAME;
use pulsar_core::model::{DynamicFileSourceType, JobId, PathType};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use wildmatch::WildMatch;

/// Performs the transfer for one output once an action has been chosen.
/// Client and server each handle only the actions executed on their side.
pub trait OutputCollector {
    /// Returns `false` when the action belongs to the other side.
    fn collect_output(
        &self,
        action: &Action,
        output_type: PathType,
        path: &Path,
        name: Option<&str>,
    ) -> Result<bool>;
}

/// Fetches client-local outputs through a [`JobClient`].
pub struct ClientOutputCollector<'a> {
    client: &'a dyn JobClient,
    job_id: JobId,
}

impl<'a> ClientOutputCollector<'a> {
    pub fn new(client: &'a dyn JobClient, job_id: JobId) -> Self {
        Self { client, job_id }
    }
}

impl OutputCollector for ClientOutputCollector<'_> {
    fn collect_output(
        &self,
        action: &Action,
        output_type: PathType,
        path: &Path,
        name: Option<&str>,
    ) -> Result<bool> {
        if !action.staging_needed() || !action.staging_action_local() {
            return Ok(false);
        }
        let name = name.map(str::to_string).unwrap_or_else(|| basename(path));
        self.client.fetch_output(
            &self.job_id,
            &FetchOutputRequest {
                path,
                name: &name,
                output_type,
                action_type: action.action_type(),
            },
        )?;
        Ok(true)
    }
}

#[derive(Debug, Default)]
struct DynamicReferences {
    filenames: BTreeSet<String>,
    extra_files: BTreeSet<String>,
}

impl DynamicReferences {
    fn matches(&self, name: &str) -> bool {
        self.filenames.contains(name) || self.extra_files.iter().any(|e| name.starts_with(e.as_str()))
    }

    fn record(&mut self, value: &serde_json::Value) {
        match value {
            serde_json::Value::Array(items) => items.iter().for_each(|v| self.record(v)),
            serde_json::Value::Object(map) => {
                for (key, v) in map {
                    if let serde_json::Value::String(s) = v {
                        match key.as_str() {
                            "filename" => {
                                self.filenames.insert(s.clone());
                            }
                            "extra_files" => {
                                self.extra_files.insert(s.clone());
                            }
                            _ => {}
                        }
                    }
                    self.record(v);
                }
            }
            _ => {}
        }
    }

    fn parse_and_record(&mut self, contents: &str) {
        match serde_json::from_str::<serde_json::Value>(contents) {
            Ok(value) => self.record(&value),
            Err(e) => tracing::warn!("Failed to parse dynamic file source contents: {}", e),
        }
    }
}

/// Download half of a job: decides per output whether and how to bring it
/// back, never aborting on a single failure.
pub struct ResultsCollector<'a> {
    collector: &'a dyn OutputCollector,
    mapper: &'a mut FileActionMapper,
    client_outputs: &'a ClientOutputs,
    pulsar_outputs: &'a PulsarOutputs,
    downloaded: BTreeSet<String>,
    failures: Vec<StagingError>,
}

impl<'a> ResultsCollector<'a> {
    pub fn new(
        collector: &'a dyn OutputCollector,
        mapper: &'a mut FileActionMapper,
        client_outputs: &'a ClientOutputs,
        pulsar_outputs: &'a PulsarOutputs,
    ) -> Self {
        Self {
            collector,
            mapper,
            client_outputs,
            pulsar_outputs,
            downloaded: BTreeSet::new(),
            failures: Vec::new(),
        }
    }

    /// Collects every output and returns the failures encountered.
    pub fn collect(mut self) -> Vec<StagingError> {
        let remaining_outputs = self.collect_working_directory_outputs();
        self.collect_outputs(&remaining_outputs);
        self.collect_version_file();

        let references = self.dynamic_references();
        let outputs = self.client_outputs;
        let reported = self.pulsar_outputs;
        self.collect_directory_files(
            outputs.working_directory.as_deref(),
            &reported.working_directory_contents,
            PathType::OutputWorkdir,
            &references,
        );
        self.collect_directory_files(
            outputs.metadata_directory.as_deref(),
            &reported.metadata_directory_contents,
            PathType::OutputMetadata,
            &references,
        );
        self.collect_directory_files(
            outputs.job_directory.as_deref(),
            &reported.job_directory_contents,
            PathType::OutputJobdir,
            &references,
        );

        let ledger = self.mapper.finalize();
        if !ledger.is_empty() {
            tracing::debug!("Finalized {} recorded transfer(s)", ledger.len());
        }
        self.failures
    }

    /// Collects declared work-dir outputs and returns the output files left
    /// for direct collection.
    fn collect_working_directory_outputs(&mut self) -> Vec<PathBuf> {
        let outputs = self.client_outputs;
        let reported = self.pulsar_outputs;
        let contents = &reported.working_directory_contents;
        let mut handled = BTreeSet::new();

        for (source, destination) in &outputs.work_dir_outputs {
            let mut name = match &outputs.working_directory {
                Some(dir) => source
                    .strip_prefix(dir)
                    .unwrap_or(source)
                    .to_string_lossy()
                    .to_string(),
                None => source.to_string_lossy().to_string(),
            };
            if !contents.contains(&name) {
                let pattern = WildMatch::new(&name);
                if let Some(matched) = contents.iter().find(|c| pattern.matches(c)) {
                    name = matched.clone();
                }
            }
            let remote_name = reported.path_helper.remote_name(&name);
            if self.attempt_collect(PathType::OutputWorkdir, destination, Some(&remote_name)) {
                self.downloaded.insert(remote_name);
            }
            handled.insert(destination.clone());
        }

        outputs
            .output_files
            .iter()
            .filter(|f| !handled.contains(*f))
            .cloned()
            .collect()
    }

    fn collect_outputs(&mut self, output_files: &[PathBuf]) {
        for output_file in output_files {
            if self.pulsar_outputs.has_output_file(output_file) {
                self.attempt_collect(PathType::Output, output_file, None);
            } else {
                tracing::debug!(
                    "Output '{}' was not produced, not collecting it",
                    output_file.display()
                );
            }
            for (local_path, remote_name) in self.pulsar_outputs.output_extras(output_file) {
                self.attempt_collect(PathType::Output, &local_path, Some(&remote_name));
            }
        }
    }

    fn collect_version_file(&mut self) {
        let outputs = self.client_outputs;
        let Some(version_file) = &outputs.version_file else {
            return;
        };
        if self.pulsar_outputs.has_version_file() {
            self.attempt_collect(PathType::Output, version_file, Some(COMMAND_VERSION_FILENAME));
        }
    }

    fn dynamic_references(&self) -> DynamicReferences {
        let mut references = DynamicReferences::default();
        for source in &self.pulsar_outputs.realized_dynamic_file_sources {
            match source.source_type {
                DynamicFileSourceType::Json => references.parse_and_record(&source.contents),
                DynamicFileSourceType::Yaml => source
                    .contents
                    .lines()
                    .filter(|line| !line.trim().is_empty())
                    .for_each(|line| references.parse_and_record(line)),
            }
        }
        references
    }

    fn collect_directory_files(
        &mut self,
        directory: Option<&Path>,
        contents: &[String],
        output_type: PathType,
        references: &DynamicReferences,
    ) {
        let Some(directory) = directory else {
            return;
        };
        for name in contents {
            if self.downloaded.contains(name) {
                continue;
            }
            if !self.client_outputs.dynamic_match(name) && !references.matches(name) {
                continue;
            }
            tracing::debug!("Collecting dynamic {} file '{}'", output_type, name);
            let local = directory.join(self.pulsar_outputs.path_helper.local_name(name));
            if self.attempt_collect(output_type, &local, Some(name)) {
                self.downloaded.insert(name.clone());
            }
        }
    }

    fn attempt_collect(&mut self, output_type: PathType, path: &Path, name: Option<&str>) -> bool {
        match self.try_collect(output_type, path, name) {
            Ok(collected) => collected,
            Err(e) if output_type == PathType::OutputWorkdir => {
                tracing::warn!(
                    "Allowed failure collecting {} '{}': {}",
                    output_type,
                    name.map(str::to_string).unwrap_or_else(|| basename(path)),
                    e
                );
                false
            }
            Err(e) => {
                tracing::warn!("Failed to collect output '{}': {}", path.display(), e);
                self.failures.push(e);
                false
            }
        }
    }

    fn try_collect(&mut self, output_type: PathType, path: &Path, name: Option<&str>) -> Result<bool> {
        let action = self
            .mapper
            .action(&ActionSource::from_path(path), output_type, None)?;
        tracing::info!(
            "Collecting output {} with action {}",
            name.map(str::to_string).unwrap_or_else(|| basename(path)),
            action
        );
        self.collector.collect_output(&action, output_type, path, name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::ActionType;
    use crate::mapper::StagingConfig;
    use pulsar_core::model::RealizedDynamicFileSource;
    use pulsar_core::path_helper::PathHelper;
    use std::cell::RefCell;

    #[derive(Default)]
    struct Recorder {
        collected: RefCell<Vec<(PathType, PathBuf, Option<String>)>>,
        fail_names: Vec<String>,
    }

    impl OutputCollector for Recorder {
        fn collect_output(
            &self,
            action: &Action,
            output_type: PathType,
            path: &Path,
            name: Option<&str>,
        ) -> Result<bool> {
            let label = name.map(str::to_string).unwrap_or_else(|| basename(path));
            if self.fail_names.contains(&label) {
                return Err(StagingError::MissingLocalPath(path.to_path_buf()));
            }
            assert!(action.staging_needed());
            self.collected
                .borrow_mut()
                .push((output_type, path.to_path_buf(), name.map(str::to_string)));
            Ok(true)
        }
    }

    fn mapper() -> FileActionMapper {
        FileActionMapper::new(StagingConfig::with_default_action(ActionType::Transfer)).unwrap()
    }

    fn reported(outputs: Vec<&str>, working: Vec<&str>) -> PulsarOutputs {
        PulsarOutputs {
            output_directory_contents: Some(outputs.into_iter().map(str::to_string).collect()),
            working_directory_contents: working.into_iter().map(str::to_string).collect(),
            path_helper: PathHelper::new("/"),
            ..Default::default()
        }
    }

    #[test]
    fn test_collects_outputs_and_skips_missing() {
        let outputs = ClientOutputs {
            output_files: vec![PathBuf::from("/g/out/1.dat"), PathBuf::from("/g/out/2.dat")],
            ..Default::default()
        };
        let pulsar = reported(vec!["1.dat", "1_files/index.html"], vec![]);
        let recorder = Recorder::default();
        let mut mapper = mapper();
        let failures = ResultsCollector::new(&recorder, &mut mapper, &outputs, &pulsar).collect();
        assert!(failures.is_empty());
        let collected = recorder.collected.borrow();
        assert_eq!(collected.len(), 2);
        assert_eq!(collected[0].1, PathBuf::from("/g/out/1.dat"));
        assert_eq!(collected[1].1, PathBuf::from("/g/out/1_files/index.html"));
        assert_eq!(collected[1].2.as_deref(), Some("1_files/index.html"));
    }

    #[test]
    fn test_work_dir_outputs_are_not_collected_twice() {
        let outputs = ClientOutputs {
            working_directory: Some(PathBuf::from("/g/work")),
            output_files: vec![PathBuf::from("/g/out/1.dat")],
            work_dir_outputs: vec![(PathBuf::from("/g/work/result*.txt"), PathBuf::from("/g/out/1.dat"))],
            ..Default::default()
        };
        let pulsar = reported(vec![], vec!["result_a.txt"]);
        let recorder = Recorder::default();
        let mut mapper = mapper();
        let failures = ResultsCollector::new(&recorder, &mut mapper, &outputs, &pulsar).collect();
        assert!(failures.is_empty());
        let collected = recorder.collected.borrow();
        assert_eq!(collected.len(), 1);
        assert_eq!(collected[0].0, PathType::OutputWorkdir);
        assert_eq!(collected[0].2.as_deref(), Some("result_a.txt"));
    }

    #[test]
    fn test_failures_accumulate_but_workdir_failures_are_allowed() {
        let outputs = ClientOutputs {
            working_directory: Some(PathBuf::from("/g/work")),
            output_files: vec![
                PathBuf::from("/g/out/bad.dat"),
                PathBuf::from("/g/out/good.dat"),
                PathBuf::from("/g/out/w.dat"),
            ],
            work_dir_outputs: vec![(PathBuf::from("/g/work/w.txt"), PathBuf::from("/g/out/w.dat"))],
            ..Default::default()
        };
        let pulsar = reported(vec!["bad.dat", "good.dat"], vec!["w.txt"]);
        let recorder = Recorder {
            fail_names: vec!["bad.dat".to_string(), "w.txt".to_string()],
            ..Default::default()
        };
        let mut mapper = mapper();
        let failures = ResultsCollector::new(&recorder, &mut mapper, &outputs, &pulsar).collect();
        assert_eq!(failures.len(), 1);
        assert_eq!(recorder.collected.borrow().len(), 1);
    }

    #[test]
    fn test_dynamic_outputs_and_realized_sources() {
        let outputs = ClientOutputs {
            working_directory: Some(PathBuf::from("/g/work")),
            dynamic_outputs: vec!["primary_*".to_string()],
            ..Default::default()
        };
        let mut pulsar = reported(
            vec![],
            vec!["primary_1.txt", "listed.tsv", "extra/a.txt", "ignored.log"],
        );
        pulsar.realized_dynamic_file_sources = vec![RealizedDynamicFileSource {
            source_type: DynamicFileSourceType::Json,
            contents: r#"{"out": [{"filename": "listed.tsv"}, {"extra_files": "extra"}]}"#.to_string(),
        }];
        let recorder = Recorder::default();
        let mut mapper = mapper();
        let failures = ResultsCollector::new(&recorder, &mut mapper, &outputs, &pulsar).collect();
        assert!(failures.is_empty());
        let names: Vec<String> = recorder
            .collected
            .borrow()
            .iter()
            .filter_map(|(_, _, n)| n.clone())
            .collect();
        assert_eq!(names, vec!["primary_1.txt", "listed.tsv", "extra/a.txt"]);
    }

    #[test]
    fn test_client_collector_skips_remote_actions() {
        struct NoClient;
        impl JobClient for NoClient {
            fn setup(&self, _: &pulsar_core::model::SetupParams) -> Result<pulsar_core::model::JobConfig> {
                unreachable!()
            }
            fn put_file(&self, _: &JobId, _: &crate::client::PutFileRequest<'_>) -> Result<String> {
                unreachable!()
            }
            fn launch(&self, _: &crate::description::LaunchRequest) -> Result<()> {
                unreachable!()
            }
            fn full_status(&self, _: &JobId) -> Result<pulsar_core::model::FullStatus> {
                unreachable!()
            }
            fn fetch_output(&self, _: &JobId, _: &FetchOutputRequest<'_>) -> Result<()> {
                panic!("remote actions must not be fetched by the client")
            }
            fn kill(&self, _: &JobId) -> Result<()> {
                unreachable!()
            }
            fn clean(&self, _: &JobId) -> Result<()> {
                unreachable!()
            }
        }
        let client = NoClient;
        let collector = ClientOutputCollector::new(&client, JobId::from("1"));
        let action = Action::build(
            ActionType::RemoteCopy,
            &ActionSource::from_path("/g/out/1.dat"),
            &Default::default(),
        )
        .unwrap();
        let collected = collector
            .collect_output(&action, PathType::Output, Path::new("/g/out/1.dat"), None)
            .unwrap();
        assert!(!collected);
    }
}
