use prometheus_client::{
    collector::Collector,
    encoding::{DescriptorEncoder, EncodeMetric},
    metrics::{gauge::ConstGauge, MetricType},
    registry::Registry,
};

use super::SharedIndex;

#[derive(Debug)]
struct Instrumented(SharedIndex);

pub fn register(reg: &mut Registry, index: SharedIndex) {
    reg.register_collector(Box::new(Instrumented(index)));
}

impl Collector for Instrumented {
    fn encode(&self, mut encoder: DescriptorEncoder<'_>) -> Result<(), std::fmt::Error> {
        let counts = self.0.read().count_by_source();

        let mut entries_encoder = encoder.encode_descriptor(
            "entries",
            "The number of prefixes in the IP cache",
            None,
            MetricType::Gauge,
        )?;
        let mut counts = counts.into_iter().collect::<Vec<_>>();
        counts.sort();
        for (source, count) in counts {
            let labels = vec![("source", source.as_str())];
            let entries = ConstGauge::new(count as u32);
            let entry_encoder = entries_encoder.encode_family(&labels)?;
            entries.encode(entry_encoder)?;
        }

        Ok(())
    }
}
