// Copyright (c) 2023 The TQUIC Authors.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::time::Duration;
use std::time::Instant;

use pi_aqm::Config;
use pi_aqm::DropTailQueue;
use pi_aqm::Ecn;
use pi_aqm::EnqueueOutcome;
use pi_aqm::Packet;
use pi_aqm::PiQueueDisc;
use pi_aqm::QueueDisc;
use pi_aqm::QueueDiscItem;
use pi_aqm::QueueSize;
use pi_aqm::Result;
use pi_aqm::Scheduler;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Event {
    Arrival,
    Departure,
    Tick,
}

/// Offer packets at twice the service rate and check the queue disc
/// invariants after every event.
fn run_overload(conf: Config, duration: Duration) -> Result<PiQueueDisc<Packet>> {
    let limit = conf.max_size().value as u64;
    let start = Instant::now();
    let mut qdisc = PiQueueDisc::builder(conf).seed(42).build(start)?;
    let mut sched = Scheduler::new(start);

    let arrival_gap = Duration::from_micros(250);
    let service_time = Duration::from_micros(500);
    sched.schedule_after(arrival_gap, Event::Arrival);
    sched.schedule_after(service_time, Event::Departure);
    if let Some(t) = qdisc.timeout() {
        sched.schedule_at(t, Event::Tick);
    }

    let mut id = 0;
    while let Some((now, event)) = sched.next_event() {
        if now > start + duration {
            break;
        }
        match event {
            Event::Arrival => {
                let ecn = if id % 2 == 0 { Ecn::Ect1 } else { Ecn::NotEct };
                qdisc.enqueue(Packet::new(id, 500, ecn), now);
                id += 1;
                sched.schedule_after(arrival_gap, Event::Arrival);
            }
            Event::Departure => {
                qdisc.dequeue(now);
                sched.schedule_after(service_time, Event::Departure);
            }
            Event::Tick => {
                qdisc.on_timeout(now);
                let p = qdisc.drop_prob();
                assert!((0.0..=1.0).contains(&p));
                if let Some(t) = qdisc.timeout() {
                    sched.schedule_at(t, Event::Tick);
                }
            }
        }
        assert!(qdisc.occupancy() <= limit);
    }

    Ok(qdisc)
}

#[test]
fn pi_overload() -> Result<()> {
    let mut conf = Config::new();
    conf.set_max_size(QueueSize::packets(100));
    let qdisc = run_overload(conf, Duration::from_secs(3))?;

    let stats = qdisc.stats();
    assert!(stats.forced_drop + stats.unforced_drop > 0);
    assert_eq!(stats.unforced_mark, 0);
    assert_eq!(
        stats.packets_enqueued - stats.packets_dequeued,
        qdisc.occupancy()
    );
    assert!(qdisc.drop_prob() > 0.0);
    Ok(())
}

#[test]
fn pi_overload_ecn() -> Result<()> {
    let mut conf = Config::new();
    conf.set_max_size(QueueSize::packets(100));
    conf.enable_ecn(true);
    let qdisc = run_overload(conf, Duration::from_secs(3))?;

    let stats = qdisc.stats();
    assert!(stats.unforced_mark > 0);
    assert!(stats.unforced_drop > 0);
    Ok(())
}

#[test]
fn pi_overload_bytes() -> Result<()> {
    let mut conf = Config::new();
    conf.set_max_size(QueueSize::bytes(50_000));
    conf.set_queue_ref(25.0);
    let qdisc = run_overload(conf, Duration::from_secs(3))?;

    assert!(qdisc.occupancy() <= 50_000);
    assert_eq!(qdisc.occupancy() % 500, 0);
    assert!(qdisc.stats().forced_drop + qdisc.stats().unforced_drop > 0);
    Ok(())
}

#[test]
fn stpi_overload() -> Result<()> {
    let mut conf = Config::new();
    conf.set_max_size(QueueSize::packets(100));
    conf.enable_stpi(true);
    let qdisc = run_overload(conf, Duration::from_secs(3))?;

    assert_eq!(qdisc.name(), "STPI");
    let stats = qdisc.stats();
    assert!(stats.forced_drop + stats.unforced_drop > 0);
    assert!(stats.packets_dequeued > 0);
    Ok(())
}

#[test]
fn pi_from_json() -> Result<()> {
    let conf = Config::from_json(r#"{"max_size": "20p", "use_ecn": true}"#)?;
    let now = Instant::now();
    let mut qdisc = PiQueueDisc::new(conf, now)?;

    for i in 0..20 {
        assert_eq!(
            qdisc.enqueue(Packet::new(i, 100, Ecn::Ect0), now),
            EnqueueOutcome::Accepted
        );
    }
    assert_eq!(
        qdisc.enqueue(Packet::new(20, 100, Ecn::Ect0), now),
        EnqueueOutcome::ForcedDrop
    );
    assert_eq!(qdisc.peek().map(|p| p.id), Some(0));
    Ok(())
}

/// An item with a fixed size which can not be marked.
#[derive(Debug)]
struct Datagram(u32);

impl QueueDiscItem for Datagram {
    fn size(&self) -> u32 {
        self.0
    }

    fn mark(&mut self) -> bool {
        false
    }
}

#[test]
fn pi_custom_item() -> Result<()> {
    let mut conf = Config::new();
    conf.set_max_size(QueueSize::bytes(4000));
    conf.enable_ecn(true);
    let now = Instant::now();
    let mut qdisc = PiQueueDisc::builder(conf)
        .internal_queue(Box::new(DropTailQueue::new(QueueSize::bytes(8000))))
        .seed(7)
        .build(now)?;

    assert_eq!(qdisc.enqueue(Datagram(3000), now), EnqueueOutcome::Accepted);
    assert_eq!(qdisc.enqueue(Datagram(1001), now), EnqueueOutcome::ForcedDrop);
    assert_eq!(qdisc.enqueue(Datagram(1000), now), EnqueueOutcome::Accepted);
    assert_eq!(qdisc.occupancy(), 4000);
    assert_eq!(qdisc.dequeue(now).map(|d| d.0), Some(3000));
    assert_eq!(qdisc.dequeue(now).map(|d| d.0), Some(1000));
    assert!(qdisc.dequeue(now).is_none());
    assert_eq!(qdisc.stats().packets_dequeued, 2);
    Ok(())
}

#[test]
fn pi_teardown() -> Result<()> {
    let now = Instant::now();
    let mut qdisc: Box<dyn QueueDisc<Packet>> = Box::new(PiQueueDisc::new(Config::new(), now)?);
    assert!(qdisc.timeout().is_some());

    qdisc.close();
    assert!(qdisc.timeout().is_none());
    qdisc.on_timeout(now + Duration::from_secs(1));
    assert!(qdisc.timeout().is_none());
    assert_eq!(format!("{:?}", qdisc), "queue disc PI.");
    Ok(())
}
