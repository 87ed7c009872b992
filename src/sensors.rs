use anyhow::Result;
use async_trait::async_trait;

#[async_trait]
pub trait TemperatureSensor: Send + Sync {
    /// Current temperature in degrees Celsius.
    async fn read_temperature(&self) -> Result<f64>;
    fn key(&self) -> String;
}
