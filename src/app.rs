//! Wiring validated settings into a runnable rig.

use crate::config::Settings;
use crate::control::{ControlLoop, LoopOptions};
use crate::hardware::{LineChannel, MockChannel, SerialChannel};
use crate::recorder::{BroadcastPublisher, CsvLog, SampleEvent, SampleRecorder};
use crate::trajectory::Waypoint;
use tokio::sync::broadcast;

/// Everything needed for one run.
pub struct Rig {
    /// Loop owning both channels and the recorder
    pub control: ControlLoop,
    /// Precomputed trajectory
    pub waypoints: Vec<Waypoint>,
    /// Subscription to the sample topic
    pub events: broadcast::Receiver<SampleEvent>,
}

/// Build both channels; simulated machines echo their commanded position.
pub fn channels(settings: &Settings, simulate: bool) -> [Box<dyn LineChannel>; 2] {
    let primary = &settings.channels.primary;
    let mirrored = &settings.channels.mirrored;

    if simulate {
        [
            Box::new(MockChannel::echo(primary.id.clone())),
            Box::new(MockChannel::echo(mirrored.id.clone())),
        ]
    } else {
        let baud_rate = settings.channels.baud_rate;
        [
            Box::new(SerialChannel::new(
                primary.id.clone(),
                primary.port.clone(),
                baud_rate,
            )),
            Box::new(SerialChannel::new(
                mirrored.id.clone(),
                mirrored.port.clone(),
                baud_rate,
            )),
        ]
    }
}

/// Assemble an idle rig from validated settings. Nothing is opened yet.
pub fn assemble(settings: &Settings, simulate: bool) -> Rig {
    let waypoints = settings.trajectory.generate();

    let publisher = BroadcastPublisher::new(
        settings.publisher.topic.clone(),
        settings.publisher.capacity,
    );
    let events = publisher.subscribe();
    let recorder = SampleRecorder::new(
        Box::new(CsvLog::new(&settings.storage.path)),
        Box::new(publisher),
    );

    let [primary, mirrored] = channels(settings, simulate);
    let control = ControlLoop::new(
        primary,
        mirrored,
        recorder,
        LoopOptions::from_settings(settings),
    );

    Rig {
        control,
        waypoints,
        events,
    }
}
