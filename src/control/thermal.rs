// src/control/thermal.rs - Energy balance of the bath and heating element

/// Stefan-Boltzmann constant, W·m⁻²·K⁻⁴.
pub const STEFAN_BOLTZMANN: f64 = 5.670373e-8;

/// Calories per joule divisor used by the stored-energy formula.
pub const CALORIES_TO_JOULES: f64 = 4.184;

const CELSIUS_TO_KELVIN: f64 = 273.15;

/// Element power from its resistance and supply voltage (V²/R).
pub fn power_watts(resistance_ohms: f64, voltage: f64) -> f64 {
    voltage.powi(2) / resistance_ohms
}

/// Seconds the element must be on to deliver `energy_joules`.
pub fn on_time_seconds(energy_joules: f64, power_watts: f64) -> f64 {
    energy_joules / power_watts
}

/// Energy held by the bath above ambient.
///
/// `specific_heat` is in cal·g⁻¹·°C⁻¹ and mass in kilograms. The calorie figure is
/// divided by 4.184, not multiplied; tuned gains assume this scale.
pub fn stored_energy_joules(t_object: f64, t_ambient: f64, mass_kg: f64, specific_heat: f64) -> f64 {
    specific_heat * (mass_kg * 1000.0) * (t_object - t_ambient) / CALORIES_TO_JOULES
}

/// Power radiated by a grey body at `t_object_c` into surroundings at `t_ambient_c`.
pub fn radiative_loss_watts(emissivity: f64, area_m2: f64, t_object_c: f64, t_ambient_c: f64) -> f64 {
    let t_object = t_object_c + CELSIUS_TO_KELVIN;
    let t_ambient = t_ambient_c + CELSIUS_TO_KELVIN;
    emissivity * STEFAN_BOLTZMANN * area_m2 * (t_object.powi(4) - t_ambient.powi(4))
}
