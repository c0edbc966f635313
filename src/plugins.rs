use crate::access::AccessType;
use crate::annotation::{AnnotationHandler, SharedScriptHost};
use crate::checker::MemoryMapChecker;
use crate::config::{Config, REPLAY_MASK};
use crate::error::{Error, Result};
use crate::handler::MemoryHandler;
use crate::interceptor::{HookSite, MemoryInterceptor};
use crate::migration::StateMigration;
use crate::registry::Registration;
use crate::remote::{RemoteMemory, RemoteMemoryHandler, RemoteOptions};
use crate::replay::ReplayHandler;
use crate::trace::TraceWriter;
use crate::tracer::MemoryTracer;

use log::{info, warn};
use std::fmt;
use std::fs::File;
use std::io::BufWriter;
use std::sync::{Arc, Mutex};

pub type SharedTraceWriter = Arc<Mutex<TraceWriter<BufWriter<File>>>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandlerKind {
    Annotation,
    Replay,
    Remote,
}

impl fmt::Display for HandlerKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            HandlerKind::Annotation => write!(f, "annotation"),
            HandlerKind::Replay => write!(f, "replay"),
            HandlerKind::Remote => write!(f, "remote"),
        }
    }
}

/// One registration a config asks for, in priority order
#[derive(Debug, Clone, PartialEq)]
pub struct Planned {
    pub kind: HandlerKind,
    pub name: String,
    pub base: u64,
    pub size: u64,
    pub mask: AccessType,
    index: usize,
}

impl Planned {
    pub fn end(&self) -> u64 {
        self.base.saturating_add(self.size)
    }

    pub fn overlaps(&self, other: &Planned) -> bool {
        self.size != 0 && other.size != 0 && self.base < other.end() && other.base < self.end()
    }
}

/// Registrations of `config` in the order they are added: annotations,
/// then replay, then remote
pub fn plan(config: &Config) -> Result<Vec<Planned>> {
    let mut planned = vec![];

    for (index, annotation) in config.annotations()?.into_iter().enumerate() {
        planned.push(Planned {
            kind: HandlerKind::Annotation,
            name: annotation.name,
            base: annotation.base,
            size: annotation.size,
            mask: annotation.mask,
            index,
        });
    }

    if let Some(replay) = &config.replay {
        replay.trace_file()?;
        planned.push(Planned {
            kind: HandlerKind::Replay,
            name: "replay".to_owned(),
            base: 0,
            size: u64::MAX,
            mask: REPLAY_MASK,
            index: 0,
        });
    }

    for (index, range) in config.remote_ranges()?.into_iter().enumerate() {
        planned.push(Planned {
            kind: HandlerKind::Remote,
            name: range.name,
            base: range.base,
            size: range.size,
            mask: range.mask,
            index,
        });
    }

    Ok(planned)
}

/// pairs of planned registrations that overlap, the later one is shadowed
pub fn overlapping(planned: &[Planned]) -> Vec<(usize, usize)> {
    let mut pairs = vec![];
    for (i, first) in planned.iter().enumerate() {
        for (j, second) in planned.iter().enumerate().skip(i + 1) {
            if first.overlaps(second) {
                pairs.push((i, j));
            }
        }
    }
    pairs
}

/// Everything a config sets up, wired together
pub struct Plugins {
    pub interceptor: MemoryInterceptor,
    pub remote: Option<Arc<RemoteMemory>>,
    pub migration: Option<StateMigration>,
    pub trace: Option<SharedTraceWriter>,
}

impl Plugins {
    /// Build from `config`, waiting for the remote device if one is
    /// configured
    pub fn load(
        config: &Config,
        hooks: Box<dyn HookSite>,
        scripts: Option<SharedScriptHost>,
    ) -> Result<Self> {
        config.validate()?;

        let remote = match &config.remote {
            Some(remote) => {
                let options = RemoteOptions {
                    endian: config.endian,
                    write_back: remote.write_back,
                    verbose: remote.verbose || config.verbose,
                    exit_on_disconnect: true,
                };
                Some(Arc::new(RemoteMemory::listen(&remote.listen, options)?))
            }
            None => None,
        };

        Plugins::with_remote(config, hooks, scripts, remote)
    }

    /// Build from `config` with an already connected remote
    pub fn with_remote(
        config: &Config,
        hooks: Box<dyn HookSite>,
        scripts: Option<SharedScriptHost>,
        remote: Option<Arc<RemoteMemory>>,
    ) -> Result<Self> {
        let planned = plan(config)?;
        for (first, second) in overlapping(&planned) {
            warn!(
                "[Plugins] {} '{}' overlaps {} '{}', the latter is shadowed there",
                planned[first].kind, planned[first].name, planned[second].kind, planned[second].name
            );
        }

        if config.remote.is_some() && remote.is_none() {
            return Err(Error::config("remote", "no remote connection"));
        }

        let annotations = config.annotations()?;
        let mut interceptor = MemoryInterceptor::new(hooks, config.verbose);

        for entry in &planned {
            let handler: Box<dyn MemoryHandler> = match entry.kind {
                HandlerKind::Annotation => {
                    let host = scripts.clone().ok_or_else(|| {
                        Error::config("annotations", "no script host to run annotations")
                    })?;
                    let annotation = &annotations[entry.index];
                    Box::new(AnnotationHandler::new(
                        &annotation.name,
                        annotation.read_handler.clone(),
                        annotation.write_handler.clone(),
                        host,
                        config.verbose,
                    ))
                }
                HandlerKind::Replay => {
                    let replay = match &config.replay {
                        Some(replay) => replay,
                        None => continue,
                    };
                    let handler = ReplayHandler::open(replay.trace_file()?, replay.state_id)?;
                    Box::new(handler.with_options(replay.skip_code, replay.concolic, replay.verbose))
                }
                HandlerKind::Remote => match &remote {
                    Some(remote) => Box::new(RemoteMemoryHandler::new(&entry.name, remote.clone())),
                    None => continue,
                },
            };

            interceptor.add_handler(Registration::new(entry.base, entry.size, entry.mask, handler));
        }

        if let Some(path) = &config.memory_map {
            let checker = MemoryMapChecker::load(path, config.verbose)?;
            info!("[Plugins] checking accesses against {} regions", checker.regions().len());
            interceptor.add_observer(Box::new(checker));
        }

        let trace = match &config.trace_output {
            Some(path) => {
                let writer = Arc::new(Mutex::new(TraceWriter::create(path)?));
                interceptor.add_observer(Box::new(MemoryTracer::new(writer.clone(), config.endian)));
                info!("[Plugins] tracing memory accesses to {}", path.display());
                Some(writer)
            }
            None => None,
        };

        let migration = match (&config.migration, &remote) {
            (Some(migration), Some(remote)) => {
                let mut state_migration =
                    StateMigration::new(remote.clone(), migration.resolve()?, config.endian);
                state_migration.breakpoint = migration.breakpoint();
                state_migration.verbose = config.verbose;
                Some(state_migration)
            }
            (Some(_), None) => {
                return Err(Error::config("migration", "needs a remote section"));
            }
            _ => None,
        };

        Ok(Plugins {
            interceptor,
            remote,
            migration,
            trace,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::access::Address;
    use crate::annotation::ScriptReply;
    use crate::test::{temp_path, trace_log, FakeDevice, FakeHooks, FakeScript, FakeState};
    use crate::value::{Endian, Value};
    use std::fs;

    #[test]
    fn plan_order_and_overlaps() {
        let config = Config::from_json(
            r#"{"annotations": [{"name": "uart", "address": "0x1000", "size": "0x1000",
                    "access_type": ["write"], "write_handler": "w"}],
                "replay": {"trace_file": "t.dat"},
                "remote": {"ranges": [{"name": "periph", "address": "0x1800", "size": "0x1000"}]}}"#,
        )
        .unwrap();

        let planned = plan(&config).unwrap();
        let kinds: Vec<HandlerKind> = planned.iter().map(|p| p.kind).collect();
        assert_eq!(kinds, vec![HandlerKind::Annotation, HandlerKind::Replay, HandlerKind::Remote]);
        assert_eq!(overlapping(&planned), vec![(0, 1), (0, 2), (1, 2)]);
    }

    #[test]
    fn annotations_need_a_script_host() {
        let config = Config::from_json(
            r#"{"annotations": [{"address": 0, "size": 4, "access_type": ["write"],
                "write_handler": "w"}]}"#,
        )
        .unwrap();
        let err = Plugins::load(&config, Box::new(FakeHooks::default()), None).err().unwrap();
        assert!(matches!(err, Error::Config { .. }));
    }

    #[test]
    fn annotation_shadows_replay() {
        let path = temp_path("plugins_replay.dat");
        fs::write(&path, trace_log(&[(0, 0x100, 32, 0xaaaa, false), (0, 0x1000, 8, 0x55, false)]).into_inner())
            .unwrap();

        let json = format!(
            r#"{{"annotations": [{{"name": "uart", "address": "0x1000", "size": "0x10",
                    "access_type": ["read"], "read_handler": "r"}}],
                "replay": {{"trace_file": {:?}}}}}"#,
            path.display().to_string()
        );
        let config = Config::from_json(&json).unwrap();
        let script = FakeScript::shared(vec![ScriptReply::concrete(0x77)]);
        let hooks = FakeHooks::default();
        let mut plugins = Plugins::load(&config, Box::new(hooks.clone()), Some(script.clone())).unwrap();
        assert_eq!(hooks.counts(), (1, 1));
        assert_eq!(plugins.interceptor.registry().len(), 2);

        let mut state = FakeState::new();
        let interceptor = &mut plugins.interceptor;
        let uart = interceptor.on_read(&mut state, Address::Concrete(0x1000), 8, true, false);
        assert_eq!(uart, Some(Value::concrete(0x77, 8)));

        let replayed = interceptor.on_read(&mut state, Address::Concrete(0x100), 32, false, false);
        assert_eq!(replayed, Some(Value::concrete(0xaaaa, 32)));
        assert_eq!(script.borrow().reads.len(), 1);

        fs::remove_file(&path).ok();
    }

    #[test]
    fn remote_and_migration() {
        let config = Config::from_json(
            r#"{"remote": {"ranges": [{"name": "periph", "address": "0x40000000", "size": "0x1000",
                    "access": ["read", "write"]}]},
                "migration": {"functions": [{"start_pc": "0x8000", "end_pc": "0x8000"}]}}"#,
        )
        .unwrap();

        let device = FakeDevice::spawn(Endian::Little);
        let remote = Arc::new(device.remote(Default::default()));
        let mut plugins =
            Plugins::with_remote(&config, Box::new(FakeHooks::default()), None, Some(remote)).unwrap();

        let mut state = FakeState::new();
        let interceptor = &mut plugins.interceptor;
        assert!(interceptor.on_write(
            &mut state,
            Address::Concrete(0x40000010),
            32,
            true,
            Value::concrete(0x1234, 32)
        ));
        let value = interceptor.on_read(&mut state, Address::Concrete(0x40000010), 32, true, false);
        assert_eq!(value, Some(Value::concrete(0x1234, 32)));

        // outside the range nothing is forwarded
        assert_eq!(interceptor.on_read(&mut state, Address::Concrete(0x100), 32, false, false), None);

        let migration = plugins.migration.as_ref().unwrap();
        assert_eq!(migration.breakpoint, 0xe1200472);
        assert!(migration.watches(0x8000));
    }

    #[test]
    fn migration_needs_remote() {
        let config = Config::from_json(
            r#"{"migration": {"functions": [{"start_pc": 0, "end_pc": 4}]}}"#,
        )
        .unwrap();
        let err = Plugins::with_remote(&config, Box::new(FakeHooks::default()), None, None)
            .err()
            .unwrap();
        assert!(matches!(err, Error::Config { .. }));
    }

    #[test]
    fn trace_output_records() {
        let path = temp_path("plugins_trace.dat");
        let json = format!(r#"{{"trace_output": {:?}}}"#, path.display().to_string());
        let config = Config::from_json(&json).unwrap();

        let hooks = FakeHooks::default();
        let mut plugins = Plugins::load(&config, Box::new(hooks.clone()), None).unwrap();
        assert_eq!(hooks.counts(), (1, 1));

        let mut state = FakeState::new();
        plugins.interceptor.on_write(&mut state, Address::Concrete(0x10), 8, false, Value::concrete(1, 8));
        plugins.trace.as_ref().unwrap().lock().unwrap().flush().unwrap();

        let mut reader = crate::trace::TraceReader::open(&path, state.id).unwrap();
        let entry = reader.next_memory_entry().unwrap();
        assert_eq!((entry.address, entry.value, entry.is_write()), (0x10, 1, true));

        fs::remove_file(&path).ok();
    }
}
