use kube::CustomResourceExt as _;
use sensor_agent_crd::SensorAgent;

fn main() -> anyhow::Result<()> {
    let manifest = serde_yaml::to_string(&SensorAgent::crd())?;
    print!("{manifest}");

    Ok(())
}
