//! Coordinate and time helpers
//!
//! The mount reports and accepts apparent coordinates of date ("J-Now"),
//! the plate solver works in J2000. The conversion rotates between the
//! two frames with IAU 1976 precession and the leading IAU 1980 nutation
//! terms. Aberration is left out; the mount applies refraction itself.
//!
//! Conventions: right ascension in hours, declination, altitude and
//! azimuth in degrees, azimuth measured from north through east.

type Matrix3 = [[f64; 3]; 3];

const ARCSEC: f64 = std::f64::consts::PI / (180.0 * 3600.0);
const J2000_JD: f64 = 2451545.0;

/// Calculate Julian Day from a chrono DateTime
pub fn julian_day(dt: &chrono::DateTime<chrono::Utc>) -> f64 {
    use chrono::{Datelike, Timelike};
    let year = dt.year();
    let month = dt.month();
    let day = dt.day();

    let (y, m) = if month <= 2 { (year - 1, month + 12) } else { (year, month) };

    let a = y / 100;
    let b = 2 - a + a / 4;

    let jd = (365.25 * (y as f64 + 4716.0)).floor()
        + (30.6001 * (m as f64 + 1.0)).floor()
        + day as f64
        + b as f64
        - 1524.5;

    let seconds = dt.hour() as f64 * 3600.0
        + dt.minute() as f64 * 60.0
        + dt.second() as f64
        + dt.nanosecond() as f64 * 1e-9;

    jd + seconds / 86400.0
}

/// Local sidereal time in hours for a Julian Day and east longitude in degrees
pub fn local_sidereal_time(jd: f64, longitude: f64) -> f64 {
    let t = (jd - J2000_JD) / 36525.0;

    // Greenwich Mean Sidereal Time in degrees
    let gmst = 280.46061837 + 360.98564736629 * (jd - J2000_JD) + 0.000387933 * t * t
        - t * t * t / 38710000.0;

    (gmst + longitude).rem_euclid(360.0) / 15.0
}

/// Convert a horizontal position to equatorial coordinates of date.
///
/// Returns (RA hours, Dec degrees) for the given latitude and local sidereal time.
pub fn alt_az_to_equatorial(altitude: f64, azimuth: f64, latitude: f64, lst_hours: f64) -> (f64, f64) {
    let alt = altitude.to_radians();
    let az = azimuth.to_radians();
    let lat = latitude.to_radians();

    let sin_dec = lat.sin() * alt.sin() + lat.cos() * alt.cos() * az.cos();
    let cos_dec_sin_ha = -az.sin() * alt.cos();
    let cos_dec_cos_ha = lat.cos() * alt.sin() - lat.sin() * alt.cos() * az.cos();

    let dec = sin_dec.atan2(cos_dec_sin_ha.hypot(cos_dec_cos_ha));
    let hour_angle = cos_dec_sin_ha.atan2(cos_dec_cos_ha);
    let ra_hours = normalize_hours(lst_hours - hour_angle.to_degrees() / 15.0);

    (ra_hours, dec.to_degrees())
}

/// Convert apparent coordinates of date to J2000 for the epoch `julian_date`
pub fn jnow_to_j2000(ra_hours: f64, dec_degrees: f64, julian_date: f64) -> (f64, f64) {
    let m = transpose(&precession_nutation(julian_date));
    from_vector(&apply(&m, &to_vector(ra_hours, dec_degrees)))
}

/// Convert J2000 coordinates to apparent coordinates of date for `julian_date`
pub fn j2000_to_jnow(ra_hours: f64, dec_degrees: f64, julian_date: f64) -> (f64, f64) {
    let m = precession_nutation(julian_date);
    from_vector(&apply(&m, &to_vector(ra_hours, dec_degrees)))
}

/// Great-circle separation of two equatorial positions, in radians
pub fn angular_separation(ra1_hours: f64, dec1: f64, ra2_hours: f64, dec2: f64) -> f64 {
    let a = to_vector(ra1_hours, dec1);
    let b = to_vector(ra2_hours, dec2);
    let cross = [
        a[1] * b[2] - a[2] * b[1],
        a[2] * b[0] - a[0] * b[2],
        a[0] * b[1] - a[1] * b[0],
    ];
    let sin = (cross[0] * cross[0] + cross[1] * cross[1] + cross[2] * cross[2]).sqrt();
    let cos = a[0] * b[0] + a[1] * b[1] + a[2] * b[2];
    sin.atan2(cos)
}

/// Wrap an hour angle into [0, 24)
pub fn normalize_hours(hours: f64) -> f64 {
    let wrapped = hours.rem_euclid(24.0);
    if wrapped >= 24.0 { 0.0 } else { wrapped }
}

/// Combined rotation J2000 -> true equator and equinox of date
fn precession_nutation(julian_date: f64) -> Matrix3 {
    let t = (julian_date - J2000_JD) / 36525.0;

    // IAU 1976 precession angles
    let zeta = (2306.2181 * t + 0.30188 * t * t + 0.017998 * t * t * t) * ARCSEC;
    let z = (2306.2181 * t + 1.09468 * t * t + 0.018203 * t * t * t) * ARCSEC;
    let theta = (2004.3109 * t - 0.42665 * t * t - 0.041833 * t * t * t) * ARCSEC;
    let precession = multiply(&multiply(&rot_z(-z), &rot_y(theta)), &rot_z(-zeta));

    // IAU 1980 nutation, terms above 0.1"
    let omega = (125.04452 - 1934.136261 * t).rem_euclid(360.0).to_radians();
    let sun = (280.4665 + 36000.7698 * t).rem_euclid(360.0).to_radians();
    let moon = (218.3165 + 481267.8813 * t).rem_euclid(360.0).to_radians();
    let delta_psi = (-17.20 * omega.sin() - 1.32 * (2.0 * sun).sin() - 0.23 * (2.0 * moon).sin()
        + 0.21 * (2.0 * omega).sin())
        * ARCSEC;
    let delta_eps = (9.20 * omega.cos() + 0.57 * (2.0 * sun).cos() + 0.10 * (2.0 * moon).cos()
        - 0.09 * (2.0 * omega).cos())
        * ARCSEC;
    let eps0 = (84381.448 - 46.8150 * t - 0.00059 * t * t + 0.001813 * t * t * t) * ARCSEC;
    let nutation = multiply(&multiply(&rot_x(-(eps0 + delta_eps)), &rot_z(-delta_psi)), &rot_x(eps0));

    multiply(&nutation, &precession)
}

fn to_vector(ra_hours: f64, dec_degrees: f64) -> [f64; 3] {
    let ra = (ra_hours * 15.0).to_radians();
    let dec = dec_degrees.to_radians();
    [dec.cos() * ra.cos(), dec.cos() * ra.sin(), dec.sin()]
}

fn from_vector(v: &[f64; 3]) -> (f64, f64) {
    let r = (v[0] * v[0] + v[1] * v[1]).sqrt();
    let ra_hours = normalize_hours(v[1].atan2(v[0]).to_degrees() / 15.0);
    let dec = v[2].atan2(r).to_degrees();
    (ra_hours, dec)
}

fn rot_x(a: f64) -> Matrix3 {
    let (s, c) = a.sin_cos();
    [[1.0, 0.0, 0.0], [0.0, c, s], [0.0, -s, c]]
}

fn rot_y(a: f64) -> Matrix3 {
    let (s, c) = a.sin_cos();
    [[c, 0.0, -s], [0.0, 1.0, 0.0], [s, 0.0, c]]
}

fn rot_z(a: f64) -> Matrix3 {
    let (s, c) = a.sin_cos();
    [[c, s, 0.0], [-s, c, 0.0], [0.0, 0.0, 1.0]]
}

fn multiply(a: &Matrix3, b: &Matrix3) -> Matrix3 {
    let mut out = [[0.0; 3]; 3];
    for (i, row) in out.iter_mut().enumerate() {
        for (j, cell) in row.iter_mut().enumerate() {
            *cell = (0..3).map(|k| a[i][k] * b[k][j]).sum();
        }
    }
    out
}

fn transpose(m: &Matrix3) -> Matrix3 {
    let mut out = [[0.0; 3]; 3];
    for (i, row) in m.iter().enumerate() {
        for (j, value) in row.iter().enumerate() {
            out[j][i] = *value;
        }
    }
    out
}

fn apply(m: &Matrix3, v: &[f64; 3]) -> [f64; 3] {
    [
        m[0][0] * v[0] + m[0][1] * v[1] + m[0][2] * v[2],
        m[1][0] * v[0] + m[1][1] * v[1] + m[1][2] * v[2],
        m[2][0] * v[0] + m[2][1] * v[1] + m[2][2] * v[2],
    ]
}
