use std::fmt;

use serde::de::{Deserialize, Deserializer, Error, MapAccess, Visitor};
use serde::ser::{Serialize, SerializeStruct, Serializer};

use crate::{TensorType, TensorValue};

/// Types serialize as their spec string, eg. `"tensor<float>(d0[1])"`.
impl Serialize for TensorType {
    fn serialize<Sr>(&self, serializer: Sr) -> Result<Sr::Ok, Sr::Error>
    where
        Sr: Serializer,
    {
        serializer.collect_str(self)
    }
}

struct TensorTypeVisitor;

impl Visitor<'_> for TensorTypeVisitor {
    type Value = TensorType;

    fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        write!(formatter, "a tensor type spec string")
    }

    fn visit_str<E: Error>(self, spec: &str) -> Result<TensorType, E> {
        spec.parse().map_err(E::custom)
    }
}

impl<'de> Deserialize<'de> for TensorType {
    fn deserialize<D>(deserializer: D) -> Result<TensorType, D::Error>
    where
        D: Deserializer<'de>,
    {
        deserializer.deserialize_str(TensorTypeVisitor)
    }
}

impl Serialize for TensorValue {
    fn serialize<Sr>(&self, serializer: Sr) -> Result<Sr::Ok, Sr::Error>
    where
        Sr: Serializer,
    {
        let mut value = serializer.serialize_struct("TensorValue", 2)?;
        value.serialize_field("type", self.ty())?;
        value.serialize_field("values", self.data())?;
        value.end()
    }
}

struct TensorValueVisitor;

impl<'de> Visitor<'de> for TensorValueVisitor {
    type Value = TensorValue;

    fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        write!(formatter, "a tensor with \"type\" and \"values\" fields")
    }

    fn visit_map<A>(self, mut map: A) -> Result<Self::Value, A::Error>
    where
        A: MapAccess<'de>,
    {
        let mut ty: Option<TensorType> = None;
        let mut values: Option<Vec<f64>> = None;

        while let Some(key) = map.next_key::<String>()? {
            match key.as_str() {
                "type" => {
                    if ty.is_some() {
                        return Err(A::Error::duplicate_field("type"));
                    }
                    ty = Some(map.next_value()?);
                }
                "values" => {
                    if values.is_some() {
                        return Err(A::Error::duplicate_field("values"));
                    }
                    values = Some(map.next_value()?);
                }
                _ => {
                    return Err(A::Error::unknown_field(&key, &["type", "values"]));
                }
            }
        }

        let Some(ty) = ty else {
            return Err(A::Error::missing_field("type"));
        };
        let Some(values) = values else {
            return Err(A::Error::missing_field("values"));
        };

        TensorValue::from_data(ty, values).map_err(A::Error::custom)
    }
}

impl<'de> Deserialize<'de> for TensorValue {
    fn deserialize<D>(deserializer: D) -> Result<TensorValue, D::Error>
    where
        D: Deserializer<'de>,
    {
        deserializer.deserialize_struct("TensorValue", &["type", "values"], TensorValueVisitor)
    }
}
