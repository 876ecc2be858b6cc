use anyhow::{Context, Result};
use log::{info, warn};
use std::path::PathBuf;
use std::sync::Arc;

use secm::adc::Adc;
use secm::boundary::{EventSink, LogSink, ParameterProvider};
use secm::experiment::Point;
use secm::feedback::{FeedbackController, ScanRequest};
use secm::master::{ControlFlags, Master};
use secm::motor::{self, CoarseMotor};
use secm::piezo::Piezo;
use secm::potentiostat::Potentiostat;

use super::config::Config;

/// Every instrument of the workstation under one supervisor.
struct Workstation {
    master: Arc<Master>,
    piezo: Arc<Piezo>,
    adc: Arc<Adc>,
    potentiostat: Arc<Potentiostat>,
    coarse: Option<Arc<CoarseMotor>>,
    sink: Arc<dyn EventSink>,
}

impl Workstation {
    fn open(config: &Config, test_mode: bool) -> Result<Self> {
        let flags = ControlFlags::new(test_mode || config.test_mode);
        let master = Arc::new(Master::new(config.master.clone(), flags.clone()));
        let sink: Arc<dyn EventSink> = Arc::new(LogSink::new(true));

        let piezo = Arc::new(
            Piezo::open(config.piezo.clone(), flags.clone()).context("Failed to open piezo stage")?,
        );
        let adc = Arc::new(Adc::open(config.adc.clone(), flags.clone()).context("Failed to open ADC")?);
        let potentiostat = Arc::new(
            Potentiostat::open(
                config.potentiostat.clone(),
                flags.clone(),
                Some(Arc::clone(&adc)),
                Arc::clone(&sink),
            )
            .context("Failed to open potentiostat")?,
        );
        let coarse = motor::discover(&config.motor, &flags)
            .context("Failed to find coarse motor")?
            .into_iter()
            .next()
            .map(Arc::new);

        master.register(piezo.clone())?;
        master.register(adc.clone())?;
        master.register(potentiostat.clone())?;
        if let Some(coarse) = &coarse {
            master.register(coarse.clone())?;
        }
        piezo.start_monitor().context("Failed to start position monitor")?;
        info!("workstation ready: {}", master.component_names().join(", "));

        Ok(Self {
            master,
            piezo,
            adc,
            potentiostat,
            coarse,
            sink,
        })
    }

    fn controller(&self, config: &Config) -> FeedbackController {
        let controller = FeedbackController::new(
            config.feedback.clone(),
            self.master.flags().clone(),
            self.piezo.clone(),
            self.adc.clone(),
            self.potentiostat.clone(),
            Arc::clone(&self.sink),
        );
        match &self.coarse {
            Some(coarse) => controller.with_coarse(coarse.clone()),
            None => controller,
        }
    }

    fn shutdown(self) {
        self.master.end_state();
    }
}

/// Run one approach, automatic or single
pub fn approach(config_path: PathBuf, automatic: bool, test_mode: bool) -> Result<()> {
    let config = Config::from_file(&config_path)?;
    let params = config.parameters();
    let approach = params.approach().context("Invalid approach parameters")?;

    let station = Workstation::open(&config, test_mode)?;
    let controller = station.controller(&config);

    let result = if automatic {
        match params.cv() {
            Ok(cv) => station
                .potentiostat
                .setup_cv(&cv)
                .context("Failed to set up the reference CV")?,
            Err(e) => warn!("no reference CV: {}", e),
        }
        controller.automatic_approach(&approach)
    } else {
        controller.single_approach(&approach)
    };
    station.shutdown();

    let outcome = result.context("Approach failed")?;
    if outcome.on_surface {
        println!("Surface found at z = {:.3} µm", outcome.z);
    } else {
        println!("No contact; stopped at z = {:.3} µm", outcome.z);
    }
    if let Some(Point::Voltammogram(cv)) = &outcome.reference {
        println!("Reference CV: {} samples", cv.len());
    }
    Ok(())
}

/// Run a hopping scan over the `[parameters]` of the config
pub fn scan(config_path: PathBuf, output: Option<PathBuf>, test_mode: bool) -> Result<()> {
    let config = Config::from_file(&config_path)?;
    let request = ScanRequest::from_parameters(&config.parameters()).context("Invalid scan parameters")?;

    let station = Workstation::open(&config, test_mode)?;
    let controller = station.controller(&config);
    let result = controller.hopping_scan(&request);
    station.shutdown();

    let mut experiment = result.context("Scan failed")?;
    if let Some(path) = output {
        experiment
            .save_as(&path)
            .with_context(|| format!("Failed to save {}", path.display()))?;
    }
    println!(
        "Measured {} of {} points",
        experiment.non_empty_count(),
        experiment.order.len()
    );
    if let Some(path) = experiment.path() {
        println!("Saved to {}", path.display());
    }
    Ok(())
}
